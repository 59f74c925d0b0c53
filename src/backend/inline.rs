use super::{Completion, IoBackend, ReadOp, SubmitError};
use std::collections::VecDeque;

/// Reads synchronously inside `submit` and reports on the next `poll`.
///
/// Completions are returned in submission order.
#[derive(Debug, Default)]
pub struct InlineBackend {
    done: VecDeque<Completion>,
}

impl InlineBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IoBackend for InlineBackend {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn submit(&mut self, mut op: ReadOp) -> Result<(), SubmitError> {
        let result = op.execute();
        self.done.push_back(op.complete(result));
        Ok(())
    }

    fn poll(&mut self, out: &mut Vec<Completion>) -> usize {
        let n = self.done.len();
        out.extend(self.done.drain(..));
        n
    }

    fn in_flight(&self) -> usize {
        self.done.len()
    }
}
