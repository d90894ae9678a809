use serde::{Deserialize, Serialize};

/// Token accounting for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// Builds a usage record whose total is the sum of both counts.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Running token counts for one open stream.
///
/// Backends report cumulative counts, so recording a count replaces the previous
/// value for that side instead of adding to it. The total is recomputed on every
/// read and is only final once the terminal chunk is built.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageAccumulator {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_prompt(&mut self, tokens: u64) {
        self.prompt_tokens = Some(tokens);
    }

    pub fn record_completion(&mut self, tokens: u64) {
        self.completion_tokens = Some(tokens);
    }

    /// Records whichever counts are present.
    pub fn record(&mut self, prompt_tokens: Option<u64>, completion_tokens: Option<u64>) {
        if let Some(tokens) = prompt_tokens {
            self.record_prompt(tokens);
        }
        if let Some(tokens) = completion_tokens {
            self.record_completion(tokens);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none() && self.completion_tokens.is_none()
    }

    /// Usage known so far, or `None` before the backend reported anything.
    pub fn snapshot(&self) -> Option<Usage> {
        if self.is_empty() {
            None
        } else {
            Some(self.total())
        }
    }

    /// Final usage with unknown sides counted as zero.
    pub fn total(&self) -> Usage {
        Usage::new(
            self.prompt_tokens.unwrap_or(0),
            self.completion_tokens.unwrap_or(0),
        )
    }
}
