//! 解码器错误类型

use contracts::StreamError;
use thiserror::Error;

/// 表面池错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// 所有表面均已租出或在等待 fence
    #[error("surface pool exhausted (capacity={capacity})")]
    Exhausted { capacity: usize },

    /// 句柄代数与槽位不符（重复释放）
    #[error("stale surface handle: slot {slot}, generation {generation}")]
    StaleHandle { slot: usize, generation: u64 },
}

/// 帧解码错误
#[derive(Debug, Error)]
pub enum DecodeError {
    /// 原始负载长度不符
    #[error("frame {sequence}: payload is {actual} bytes, expected {expected}")]
    SizeMismatch {
        sequence: u64,
        expected: usize,
        actual: usize,
    },

    /// 帧头尺寸不可用
    #[error("frame {sequence}: invalid dimensions {width}x{height}")]
    Dimensions { sequence: u64, width: u32, height: u32 },

    /// 图像编解码器拒绝了负载
    #[error("frame {sequence}: {codec} decode failed: {message}")]
    Codec {
        sequence: u64,
        codec: &'static str,
        message: String,
    },

    /// 未注册该帧编码标签对应的编解码器
    #[error("frame {sequence}: no codec for {codec}")]
    Unsupported { sequence: u64, codec: &'static str },

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl DecodeError {
    /// 创建图像编解码错误
    pub fn codec(sequence: u64, codec: &'static str, message: impl Into<String>) -> Self {
        Self::Codec {
            sequence,
            codec,
            message: message.into(),
        }
    }

    /// 丢帧原因的指标标签
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Pool(PoolError::Exhausted { .. }) => "exhausted",
            Self::Pool(_) => "pool",
            _ => "corrupt",
        }
    }
}

impl From<PoolError> for StreamError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { capacity } => StreamError::ResourceExhausted { capacity },
            PoolError::StaleHandle { .. } => StreamError::compositor(err.to_string()),
        }
    }
}

impl From<DecodeError> for StreamError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Pool(pool) => pool.into(),
            DecodeError::SizeMismatch { sequence, .. }
            | DecodeError::Dimensions { sequence, .. }
            | DecodeError::Codec { sequence, .. }
            | DecodeError::Unsupported { sequence, .. } => {
                StreamError::decode_corruption(sequence, err.to_string())
            }
        }
    }
}
