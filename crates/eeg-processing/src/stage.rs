//! Core trait for pipeline stages

use eeg_core::EegResult;

/// A reactive pipeline stage.
///
/// A stage does work only when its upstream stage feeds it an input. Returning
/// `Ok(None)` means the stage is holding the input and waiting for more.
pub trait Stage: Send {
    type Input;
    type Output;

    /// Consume one input, possibly producing one output
    fn process(&mut self, input: Self::Input) -> EegResult<Option<Self::Output>>;

    /// Stage name for logs
    fn name(&self) -> &str;

    /// Drop all retained history
    fn reset(&mut self);

    /// Inputs currently held back by the stage
    fn pending(&self) -> usize {
        0
    }
}
