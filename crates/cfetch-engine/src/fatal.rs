use std::sync::OnceLock;

use crate::error::FatalError;

/// Write-once slot for the run-wide fatal error. First writer wins.
#[derive(Debug, Default)]
pub struct FatalCell(OnceLock<FatalError>);

impl FatalCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err` unless something was recorded already.
    ///
    /// Returns whether this call was the one that set it.
    pub fn set(&self, err: FatalError) -> bool {
        self.0.set(err).is_ok()
    }

    pub fn get(&self) -> Option<&FatalError> {
        self.0.get()
    }

    pub fn is_set(&self) -> bool {
        self.0.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_first_writer_wins() {
        let cell = Arc::new(FatalCell::new());
        let winners: usize = (0..8u32)
            .map(|i| {
                let cell = cell.clone();
                thread::spawn(move || {
                    cell.set(FatalError::UnauthorizedLimit { count: i, limit: 0 })
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
        assert!(cell.is_set());
    }
}
