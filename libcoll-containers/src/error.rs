// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Every way a container operation can fail. The codes are stable; callers
/// match on them rather than on message text.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Error)]
#[non_exhaustive]
pub enum ContainerError {
    #[error("search or removal target is absent")]
    NotFound,
    #[error("index outside the container's range")]
    Index,
    #[error("mutation attempted on a read-only container")]
    ReadOnly,
    #[error("could not open the file")]
    FileOpen,
    #[error("read error in input stream")]
    FileRead,
    #[error("write error in output stream")]
    FileWrite,
    #[error("not a stream for this container kind")]
    WrongFile,
    #[error("operation absent on this container")]
    NotImplemented,
    #[error("internal invariant violated")]
    Internal,
    #[error("cursor used after the container changed")]
    ObjectChanged,
    #[error("container is not empty")]
    NotEmpty,
    #[error("container is full")]
    Full,
    #[error("assertion failed")]
    AssertionFailed,
    #[error("bad argument")]
    BadArg,
    #[error("allocator returned no memory")]
    NoMemory,
    #[error("named file is absent")]
    NoEnt,
    #[error("operands have incompatible shapes or compare functions")]
    Incompatible,
    #[error("freed pointer is not in the tracking set")]
    BadPointer,
    #[error("red zone past the user region was overwritten")]
    BufferOverflow,
    #[error("zero element in divisor")]
    DivisionByZero,
    #[error("mask length does not match container length")]
    BadMask,
}

/// Per-container hook consulted whenever an operation reports a failure.
/// It observes the failure; it cannot suppress or replace it.
pub type ErrorHook = fn(operation: &'static str, error: &ContainerError);

/// Routes a failure through the hook when one is installed, otherwise emits
/// a structured event. Returns the error so call sites can `return Err(..)`
/// in one expression.
pub(crate) fn report(
    hook: Option<ErrorHook>,
    operation: &'static str,
    error: ContainerError,
) -> ContainerError {
    match hook {
        Some(hook) => hook(operation, &error),
        None => tracing::error!(operation, %error, "container operation failed"),
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let codes = [
            ContainerError::NotFound,
            ContainerError::Index,
            ContainerError::ReadOnly,
            ContainerError::ObjectChanged,
            ContainerError::NotEmpty,
            ContainerError::Incompatible,
            ContainerError::BadMask,
            ContainerError::DivisionByZero,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_report_returns_the_error() {
        fn hook(_op: &'static str, _err: &ContainerError) {}
        let err = report(Some(hook), "test", ContainerError::Index);
        assert_eq!(ContainerError::Index, err);
    }
}
