#![cfg_attr(not(feature = "std"), no_std)]

mod error;
mod host_error;
mod value;

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std as alloc;

pub use self::{
    error::{BasicError, ErrorCode},
    host_error::HostError,
    value::{
        ArithmeticOps,
        ExtendInto,
        FloatOps,
        IntegerOps,
        LittleEndianConvert,
        TryTruncateInto,
        ValueType,
        WrapInto,
    },
};
