use crate::error::ErrorCode;
use crate::request::{DestinationKind, Request};

/// Details of the first failure since the record was last retrieved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureDetails {
    pub code: ErrorCode,
    /// Source file name; `None` for memory sources.
    pub filename: Option<String>,
    pub offset: u64,
    pub source_size: u32,
    pub destination: DestinationKind,
    pub dest_size: u32,
    pub cancellation_tag: u64,
    pub name: Option<String>,
}

/// Cumulative failure count plus the first failure's details.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorRecord {
    pub failure_count: u32,
    pub first_failure: Option<FailureDetails>,
}

impl ErrorRecord {
    pub(crate) fn record(&mut self, code: ErrorCode, req: &Request) {
        self.failure_count = self.failure_count.saturating_add(1);
        if self.first_failure.is_none() {
            self.first_failure = Some(FailureDetails {
                code,
                filename: req.file_name().map(str::to_owned),
                offset: req.offset(),
                source_size: req.source_size,
                destination: req.destination.kind(),
                dest_size: req.dest_size,
                cancellation_tag: req.cancellation_tag,
                name: req.name.clone(),
            });
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.failure_count == 0
    }
}
