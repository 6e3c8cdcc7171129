use crate::addr::PhysAddr;
use crate::zone::ZoneError;
use kernel_sync::Interrupted;

pub type HpaResult<T> = Result<T, HpaError>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HpaError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("too many regions")]
    TooManyRegions,
    #[error("interrupted")]
    Interrupted,
    #[error("contiguous range reservation failed")]
    ReservationFailed,
    #[error("page {0} is not managed by any block")]
    NotFound(PhysAddr),
    #[error("out of memory for allocator metadata")]
    OutOfMemory,
    #[error("{0} pages are still allocated")]
    InUse(u32),
}

impl From<ZoneError> for HpaError {
    fn from(value: ZoneError) -> Self {
        match value {
            ZoneError::Interrupted => Self::Interrupted,
            ZoneError::Busy | ZoneError::Fatal => Self::ReservationFailed,
        }
    }
}

impl From<Interrupted> for HpaError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}
