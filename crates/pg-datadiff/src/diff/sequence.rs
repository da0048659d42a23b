//! Sequence comparison by `last_value`.

use std::cmp::Ordering;

use tracing::warn;

use super::{recover, side, CompareOptions, SideError, Verdict};
use crate::core::SequenceState;
use crate::source::DataSource;

/// Compares one sequence across the two sources.
pub struct SequenceComparator<'a, S: DataSource + ?Sized> {
    first: &'a S,
    second: &'a S,
    options: &'a CompareOptions,
}

impl<'a, S: DataSource + ?Sized> SequenceComparator<'a, S> {
    pub fn new(first: &'a S, second: &'a S, options: &'a CompareOptions) -> Self {
        Self {
            first,
            second,
            options,
        }
    }

    async fn read(
        &self,
        source: &S,
        schema: &str,
        name: &str,
    ) -> std::result::Result<SequenceState, SideError> {
        let last_value = side(source, source.sequence_last_value(schema, name).await)?;
        Ok(SequenceState {
            name: name.to_string(),
            last_value,
        })
    }

    /// Compare the position of sequence `name`.
    ///
    /// A second source lagging behind is inconclusive (it may simply not have
    /// caught up yet); a second source ahead of the first is a mismatch.
    pub async fn compare(&self, name: &str) -> Verdict {
        let first = match self.read(self.first, &self.options.schema, name).await {
            Ok(state) => state,
            Err(err) => return self.fail(name, err, "first").await,
        };
        let second = match self
            .read(self.second, &self.options.second_schema, name)
            .await
        {
            Ok(state) => state,
            Err(err) => return self.fail(name, err, "second").await,
        };

        classify(&first, &second)
    }

    async fn fail(&self, name: &str, err: SideError, missing_on: &str) -> Verdict {
        warn!("Sequence {}: {} database failed: {}", name, err.label, err.error);
        recover(self.first, self.second).await;
        err.into_verdict(&format!("sequence doesn't exist in {} database", missing_on))
    }
}

fn classify(first: &SequenceState, second: &SequenceState) -> Verdict {
    let (a, b) = (first.last_value, second.last_value);
    match a.cmp(&b) {
        Ordering::Equal => Verdict::matched(format!("sequences are identical ({})", a)),
        Ordering::Less => Verdict::inconclusive(format!(
            "first sequence is less than the second ({} vs {})",
            a, b
        )),
        Ordering::Greater => Verdict::mismatch(format!(
            "first sequence is greater than the second ({} vs {})",
            a, b
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Status;
    use crate::source::MemorySource;

    fn pair(a: i64, b: i64) -> (MemorySource, MemorySource) {
        let first = MemorySource::new("first");
        let second = MemorySource::new("second");
        first.set_sequence("public", "users_id_seq", a).unwrap();
        second.set_sequence("public", "users_id_seq", b).unwrap();
        (first, second)
    }

    #[test]
    fn test_classify_states() {
        let state = |last_value| SequenceState {
            name: "s".to_string(),
            last_value,
        };
        assert!(classify(&state(1), &state(1)).is_match());
        assert!(classify(&state(1), &state(2)).is_inconclusive());
        assert_eq!(
            classify(&state(2), &state(1)),
            Verdict::mismatch("first sequence is greater than the second (2 vs 1)")
        );
    }

    #[tokio::test]
    async fn test_equal_positions_match() {
        let (a, b) = pair(100, 100);
        let options = CompareOptions::default();
        let verdict = SequenceComparator::new(&a, &b, &options)
            .compare("users_id_seq")
            .await;
        assert_eq!(verdict, Verdict::matched("sequences are identical (100)"));
    }

    #[tokio::test]
    async fn test_first_behind_is_inconclusive() {
        let (a, b) = pair(95, 100);
        let options = CompareOptions::default();
        let verdict = SequenceComparator::new(&a, &b, &options)
            .compare("users_id_seq")
            .await;
        assert_eq!(verdict.status, Status::Inconclusive);
        assert!(verdict.reason.contains("less than"));
    }

    #[tokio::test]
    async fn test_first_ahead_is_mismatch() {
        let (a, b) = pair(100, 95);
        let options = CompareOptions::default();
        let verdict = SequenceComparator::new(&a, &b, &options)
            .compare("users_id_seq")
            .await;
        assert_eq!(verdict.status, Status::Mismatch);
        assert!(verdict.reason.contains("greater than"));
    }

    #[tokio::test]
    async fn test_missing_on_second_then_next_compare_succeeds() {
        let (a, b) = pair(10, 10);
        a.set_sequence("public", "orders_id_seq", 3).unwrap();
        let options = CompareOptions::default();
        let comparator = SequenceComparator::new(&a, &b, &options);

        assert_eq!(
            comparator.compare("orders_id_seq").await,
            Verdict::mismatch("sequence doesn't exist in second database")
        );
        assert!(!b.is_aborted());
        assert!(comparator.compare("users_id_seq").await.is_match());
    }

    #[tokio::test]
    async fn test_missing_on_first() {
        let (a, b) = pair(10, 10);
        b.set_sequence("public", "orders_id_seq", 3).unwrap();
        let options = CompareOptions::default();

        let verdict = SequenceComparator::new(&a, &b, &options)
            .compare("orders_id_seq")
            .await;
        assert_eq!(verdict, Verdict::mismatch("sequence doesn't exist in first database"));
        assert!(!a.is_aborted());
    }

    #[tokio::test]
    async fn test_second_schema() {
        let a = MemorySource::new("first");
        let b = MemorySource::new("second");
        a.set_sequence("public", "s", 7).unwrap();
        b.set_sequence("restored", "s", 7).unwrap();
        let options = CompareOptions {
            second_schema: "restored".to_string(),
            ..Default::default()
        };

        let verdict = SequenceComparator::new(&a, &b, &options).compare("s").await;
        assert!(verdict.is_match());
    }
}
