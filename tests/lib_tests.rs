use std::sync::Arc;

use chrono::{Duration, Utc};
use regex::Regex;

use pastekeep::config::{AppConfig, StoreBackend};
use pastekeep::service::ids::{generate_id, generate_unique_id};
use pastekeep::service::sqlite::SqlitePasteStore;
use pastekeep::{
    create_stores, ExpiresIn, MemoryPasteStore, PasteFilter, PasteUpdate, Pasty, SharedPasteStore,
    StoreError, StoredContent, StoredPaste,
};

fn backends() -> Vec<(&'static str, SharedPasteStore)> {
    vec![
        ("memory", Arc::new(MemoryPasteStore::new())),
        (
            "sqlite",
            Arc::new(SqlitePasteStore::open_memory().expect("sqlite store")),
        ),
    ]
}

fn stored(id: &str, owner: Option<&str>) -> StoredPaste {
    StoredPaste {
        id: id.into(),
        title: "title".into(),
        created_at: Utc::now(),
        expires_in: ExpiresIn::Never,
        deletes_at: None,
        owner_id: owner.map(Into::into),
        private: false,
        pinned: false,
        tags: Vec::new(),
        stars: Vec::new(),
        content: StoredContent::Plain {
            pasties: vec![Pasty {
                id: "p1".into(),
                title: String::new(),
                content: "hello".into(),
                language: "Text".into(),
            }],
            history: Vec::new(),
        },
    }
}

#[test]
fn ids_are_eight_lowercase_alphanumerics() {
    let shape = Regex::new(r"^[a-z0-9]{8}$").unwrap();
    for _ in 0..200 {
        let id = generate_id();
        assert!(shape.is_match(&id), "unexpected id {id}");
    }
}

#[test]
fn unique_id_skips_taken_candidates() {
    let mut calls = 0;
    let id = generate_unique_id(|_| {
        calls += 1;
        calls < 3
    });
    assert_eq!(calls, 3);
    assert_eq!(id.len(), 8);
}

#[tokio::test]
async fn store_contract_holds_for_every_backend() {
    for (name, store) in backends() {
        store.insert_paste(stored("abc", Some("u1"))).await.unwrap();
        assert!(store.paste_exists("abc").await.unwrap(), "{name}");
        assert!(
            matches!(
                store.insert_paste(stored("abc", None)).await,
                Err(StoreError::Duplicate(_))
            ),
            "{name}"
        );

        assert!(store
            .update_paste("abc", PasteUpdate::Tags(vec!["rust".into()]))
            .await
            .unwrap());
        assert!(!store
            .update_paste("missing", PasteUpdate::Private(true))
            .await
            .unwrap());

        let tagged = PasteFilter {
            tag: Some("rust".into()),
            ..PasteFilter::owned_by("u1")
        };
        assert_eq!(store.count_pastes(&tagged).await.unwrap(), 1, "{name}");

        assert!(store.delete_paste("abc").await.unwrap(), "{name}");
        assert!(!store.delete_paste("abc").await.unwrap(), "{name}");
        assert!(store.get_paste("abc").await.unwrap().is_none(), "{name}");
    }
}

#[tokio::test]
async fn listings_are_newest_first_in_every_backend() {
    for (name, store) in backends() {
        let now = Utc::now();
        for (offset, id) in [(3, "old"), (1, "new"), (2, "mid")] {
            let mut paste = stored(id, Some("u1"));
            paste.created_at = now - Duration::minutes(offset);
            store.insert_paste(paste).await.unwrap();
        }
        let ids: Vec<String> = store
            .find_pastes(&PasteFilter::owned_by("u1"))
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, ["new", "mid", "old"], "{name}");
    }
}

#[tokio::test]
async fn sqlite_backend_survives_reopen() {
    let dir = std::env::temp_dir().join(format!("pastekeep-lib-{}", generate_id()));
    let config = AppConfig {
        store: StoreBackend::Sqlite {
            path: dir.join("pastes.db"),
        },
        ..AppConfig::default()
    };

    let stores = create_stores(&config).expect("open sqlite");
    stores.pastes.insert_paste(stored("keep", None)).await.unwrap();
    drop(stores);

    let reopened = create_stores(&config).expect("reopen sqlite");
    let paste = reopened.pastes.get_paste("keep").await.unwrap();
    assert_eq!(paste.map(|p| p.title), Some("title".to_string()));

    let _ = std::fs::remove_dir_all(dir);
}
