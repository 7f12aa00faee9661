//! Short random identifiers for pastes, pasties, history entries and tokens.

use std::future::Future;

use nanoid::nanoid;

pub const ID_LENGTH: usize = 8;

/// Lowercase letters and digits.
pub const ID_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

pub fn generate_id() -> String {
    nanoid!(ID_LENGTH, &ID_ALPHABET)
}

/// Draws ids until `exists` reports a free one. There is no retry cap.
pub fn generate_unique_id<F>(mut exists: F) -> String
where
    F: FnMut(&str) -> bool,
{
    loop {
        let candidate = generate_id();
        if !exists(&candidate) {
            return candidate;
        }
        log::debug!("id collision on {candidate}, retrying");
    }
}

/// Same as [`generate_unique_id`] for predicates that hit storage.
pub async fn generate_unique_id_async<F, Fut, E>(mut exists: F) -> Result<String, E>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    loop {
        let candidate = generate_id();
        if !exists(candidate.clone()).await? {
            return Ok(candidate);
        }
        log::debug!("id collision on {candidate}, retrying");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_use_short_alphabet() {
        for _ in 0..200 {
            let id = generate_id();
            assert_eq!(id.len(), ID_LENGTH);
            assert!(id.chars().all(|c| ID_ALPHABET.contains(&c)), "{id}");
        }
    }

    #[test]
    fn retries_until_predicate_reports_free() {
        let mut calls = 0;
        let id = generate_unique_id(|_| {
            calls += 1;
            calls < 4
        });
        assert_eq!(calls, 4);
        assert_eq!(id.len(), ID_LENGTH);
    }

    #[test]
    fn avoids_ids_already_taken() {
        let mut taken = HashSet::new();
        for _ in 0..100 {
            let id = generate_unique_id(|candidate| taken.contains(candidate));
            assert!(taken.insert(id));
        }
    }

    #[tokio::test]
    async fn async_predicate_propagates_errors() {
        let result: Result<String, &str> =
            generate_unique_id_async(|_| async { Err("store down") }).await;
        assert_eq!(result, Err("store down"));

        let mut attempts = 0;
        let id: Result<String, &str> = generate_unique_id_async(|_| {
            attempts += 1;
            let taken = attempts == 1;
            async move { Ok(taken) }
        })
        .await;
        assert!(id.is_ok());
        assert_eq!(attempts, 2);
    }
}
