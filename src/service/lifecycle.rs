//! Paste lifecycle: create, read, edit, metadata toggles and deletion.
//!
//! Every operation takes the acting user and, where content is involved, the
//! passphrase explicitly. Expired pastes are removed when they are next touched.

use std::sync::Arc;

use crate::{
    DecryptedPasteData, Paste, PasteDiff, PasteFilter, PasteHistoryCompact, PasteUpdate, Pasty,
    Scope, SharedPasteStore, StoredContent, StoredPaste,
};

use super::access::{
    authorize_session, can_view_tags, evaluate, evaluate_create, Actor, CreateFlags, Operation,
    PasteAttributes,
};
use super::crypto::{seal_content, unseal_content, CryptoError};
use super::error::{ServiceError, ServiceResult};
use super::history;
use super::ids::{generate_unique_id, generate_unique_id_async};
use super::languages::{resolve_language, BuiltinLanguages, LanguageResolver};
use super::models::{
    normalize_tags, OwnedPastesQuery, Page, PasteCreateInfo, PasteEditInfo, PasteWithLangStats,
};
use super::stats::{language_stats, paste_stats, LanguageStat, PasteStats};
use super::time::current_time;

#[derive(Clone)]
pub struct PasteService {
    store: SharedPasteStore,
    languages: Arc<dyn LanguageResolver>,
}

impl PasteService {
    pub fn new(store: SharedPasteStore) -> Self {
        Self::with_languages(store, Arc::new(BuiltinLanguages))
    }

    pub fn with_languages(store: SharedPasteStore, languages: Arc<dyn LanguageResolver>) -> Self {
        Self { store, languages }
    }

    pub async fn create(
        &self,
        info: PasteCreateInfo,
        actor: &Actor,
        passphrase: Option<&str>,
    ) -> ServiceResult<Paste> {
        info.validate()?;
        let tags = normalize_tags(&info.tags);

        evaluate_create(
            actor,
            CreateFlags {
                anonymous: info.anonymous,
                private: info.private,
                pinned: info.pinned,
                tagged: !tags.is_empty(),
            },
        )
        .into_result()?;

        let passphrase = match (info.encrypted, passphrase.filter(|p| !p.is_empty())) {
            (true, None) => return Err(CryptoError::MissingKey.into()),
            (true, key) => key,
            (false, _) => None,
        };

        let mut pasties: Vec<Pasty> = Vec::with_capacity(info.pasties.len());
        for pasty in info.pasties {
            let language =
                resolve_language(self.languages.as_ref(), pasty.language.as_deref(), &pasty.content)
                    .await?;
            let id = generate_unique_id(|candidate| pasties.iter().any(|p| p.id == candidate));
            pasties.push(Pasty {
                id,
                title: pasty.title,
                content: pasty.content,
                language,
            });
        }

        let store = &self.store;
        let id = generate_unique_id_async(|candidate| async move {
            store.paste_exists(&candidate).await
        })
        .await?;

        let created_at = current_time();
        let data = DecryptedPasteData {
            pasties,
            history: Vec::new(),
        };
        let content = match passphrase {
            Some(key) => seal_content(&data, key)?,
            None => StoredContent::Plain {
                pasties: data.pasties.clone(),
                history: Vec::new(),
            },
        };

        let stored = StoredPaste {
            id,
            title: info.title,
            created_at,
            expires_in: info.expires_in,
            deletes_at: info.expires_in.deletes_at(created_at),
            owner_id: if info.anonymous {
                None
            } else {
                actor.user_id().map(str::to_string)
            },
            private: info.private,
            pinned: info.pinned,
            tags,
            stars: Vec::new(),
            content,
        };

        self.store.insert_paste(stored.clone()).await?;
        log::info!(
            "created paste {} ({}, {} pasties)",
            stored.id,
            if stored.content.is_encrypted() {
                "encrypted"
            } else {
                "plain"
            },
            data.pasties.len()
        );

        Ok(read_model(stored, data, actor))
    }

    /// Fetches a paste that has not expired. Expired ones are deleted on the way.
    async fn fetch_live(&self, id: &str) -> ServiceResult<StoredPaste> {
        let paste = self
            .store
            .get_paste(id)
            .await?
            .ok_or_else(ServiceError::paste_not_found)?;

        if paste.is_expired_at(current_time()) {
            match self.store.delete_paste(&paste.id).await {
                Ok(_) => log::info!("paste {} expired", paste.id),
                Err(err) => log::warn!("failed to delete expired paste {}: {err}", paste.id),
            }
            return Err(ServiceError::paste_not_found());
        }

        Ok(paste)
    }

    /// Session check, fetch, then the full decision for `op`.
    async fn fetch_for(&self, id: &str, actor: &Actor, op: Operation) -> ServiceResult<StoredPaste> {
        authorize_session(actor, op).into_result()?;
        let paste = self.fetch_live(id).await?;
        evaluate(actor, PasteAttributes::from(&paste), op).into_result()?;
        Ok(paste)
    }

    pub async fn get(
        &self,
        id: &str,
        actor: &Actor,
        passphrase: Option<&str>,
    ) -> ServiceResult<Paste> {
        let paste = self.fetch_for(id, actor, Operation::Read).await?;
        let data = unseal_content(&paste.content, passphrase)?;
        Ok(read_model(paste, data, actor))
    }

    pub async fn is_encrypted(&self, id: &str, actor: &Actor) -> ServiceResult<bool> {
        let paste = self.fetch_for(id, actor, Operation::Read).await?;
        Ok(paste.content.is_encrypted())
    }

    pub async fn delete(&self, id: &str, actor: &Actor) -> ServiceResult<()> {
        let paste = self.fetch_for(id, actor, Operation::Delete).await?;
        self.store.delete_paste(&paste.id).await?;
        log::info!("deleted paste {}", paste.id);
        Ok(())
    }

    pub async fn is_starred(&self, id: &str, actor: &Actor) -> ServiceResult<bool> {
        let user_id = actor.user_id().ok_or_else(|| {
            ServiceError::Unauthorized("You must be authorized to star pastes.".into())
        })?;
        let paste = self.fetch_for(id, actor, Operation::Read).await?;
        Ok(paste.stars.iter().any(|s| s == user_id))
    }

    /// Returns whether the paste is starred by the actor afterwards.
    pub async fn toggle_star(&self, id: &str, actor: &Actor) -> ServiceResult<bool> {
        let paste = self.fetch_for(id, actor, Operation::ToggleStar).await?;
        let user_id = actor
            .user_id()
            .ok_or_else(|| ServiceError::Unauthorized("You must be authorized to star pastes.".into()))?;

        let mut stars = paste.stars;
        let starred = match stars.iter().position(|s| s == user_id) {
            Some(index) => {
                stars.remove(index);
                false
            }
            None => {
                stars.push(user_id.to_string());
                true
            }
        };
        self.persist(&paste.id, PasteUpdate::Stars(stars)).await?;
        Ok(starred)
    }

    /// Returns the new pinned flag.
    pub async fn toggle_pinned(&self, id: &str, actor: &Actor) -> ServiceResult<bool> {
        let paste = self.fetch_for(id, actor, Operation::TogglePinned).await?;
        let pinned = !paste.pinned;
        self.persist(&paste.id, PasteUpdate::Pinned(pinned)).await?;
        Ok(pinned)
    }

    /// Returns the new private flag.
    pub async fn toggle_private(&self, id: &str, actor: &Actor) -> ServiceResult<bool> {
        let paste = self.fetch_for(id, actor, Operation::TogglePrivate).await?;
        let private = !paste.private;
        self.persist(&paste.id, PasteUpdate::Private(private)).await?;
        Ok(private)
    }

    /// Replaces the tag set and returns it normalized.
    pub async fn edit_tags<I, S>(&self, id: &str, actor: &Actor, tags: I) -> ServiceResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paste = self.fetch_for(id, actor, Operation::EditTags).await?;
        let tags = normalize_tags(tags);
        self.persist(&paste.id, PasteUpdate::Tags(tags.clone()))
            .await?;
        Ok(tags)
    }

    pub async fn edit(
        &self,
        id: &str,
        info: PasteEditInfo,
        actor: &Actor,
        passphrase: Option<&str>,
    ) -> ServiceResult<Paste> {
        info.validate()?;
        let stored = self.fetch_for(id, actor, Operation::Edit).await?;
        let encrypted = stored.content.is_encrypted();
        let data = unseal_content(&stored.content, passphrase)?;
        let mut paste = read_model(stored, data, actor);

        let mut pasties: Vec<Pasty> = Vec::with_capacity(info.pasties.len());
        for pasty in info.pasties {
            let language =
                resolve_language(self.languages.as_ref(), pasty.language.as_deref(), &pasty.content)
                    .await?;
            let id = match pasty.id.filter(|id| !pasties.iter().any(|p| &p.id == id)) {
                Some(id) => id,
                None => generate_unique_id(|candidate| pasties.iter().any(|p| p.id == candidate)),
            };
            pasties.push(Pasty {
                id,
                title: pasty.title,
                content: pasty.content,
                language,
            });
        }

        history::apply_edit(&mut paste, info.title, pasties, current_time());

        let data = DecryptedPasteData {
            pasties: paste.pasties.clone(),
            history: paste.history.clone(),
        };
        let content = if encrypted {
            let key = passphrase.ok_or(CryptoError::MissingKey)?;
            seal_content(&data, key)?
        } else {
            StoredContent::Plain {
                pasties: data.pasties,
                history: data.history,
            }
        };

        self.persist(
            &paste.id,
            PasteUpdate::Body {
                title: paste.title.clone(),
                content,
            },
        )
        .await?;
        log::info!("edited paste {} ({} edits)", paste.id, paste.history.len());
        Ok(paste)
    }

    async fn persist(&self, id: &str, update: PasteUpdate) -> ServiceResult<()> {
        if self.store.update_paste(id, update).await? {
            Ok(())
        } else {
            Err(ServiceError::paste_not_found())
        }
    }

    pub async fn history_compact(
        &self,
        id: &str,
        actor: &Actor,
        passphrase: Option<&str>,
    ) -> ServiceResult<Vec<PasteHistoryCompact>> {
        let paste = self.get(id, actor, passphrase).await?;
        Ok(history::compact(&paste.history))
    }

    pub async fn at_edit(
        &self,
        id: &str,
        history_id: &str,
        actor: &Actor,
        passphrase: Option<&str>,
    ) -> ServiceResult<Paste> {
        let paste = self.get(id, actor, passphrase).await?;
        history::at_edit(paste, history_id)
    }

    pub async fn diff(
        &self,
        id: &str,
        history_id: &str,
        actor: &Actor,
        passphrase: Option<&str>,
    ) -> ServiceResult<PasteDiff> {
        let paste = self.get(id, actor, passphrase).await?;
        history::diff(&paste, history_id)
    }

    pub async fn stats(
        &self,
        id: &str,
        actor: &Actor,
        passphrase: Option<&str>,
    ) -> ServiceResult<PasteStats> {
        let paste = self.get(id, actor, passphrase).await?;
        Ok(paste_stats(&paste.pasties))
    }

    pub async fn language_stats(
        &self,
        id: &str,
        actor: &Actor,
        passphrase: Option<&str>,
    ) -> ServiceResult<Vec<LanguageStat>> {
        let paste = self.get(id, actor, passphrase).await?;
        Ok(language_stats(&paste.pasties, self.languages.as_ref()))
    }

    /// Pastes owned by `owner_id` as seen by `actor`, expired ones excluded.
    /// Encrypted entries carry no pasties.
    pub async fn owned_pastes(
        &self,
        owner_id: &str,
        actor: &Actor,
        query: &OwnedPastesQuery,
    ) -> ServiceResult<Page<PasteWithLangStats>> {
        query.page.validate()?;
        let is_self = actor.owns(Some(owner_id));

        let mut filter = PasteFilter::owned_by(owner_id);
        if !is_self || !actor.has_scope(&[Scope::Paste, Scope::PasteRead]) {
            filter.private = Some(false);
        }
        if query.pinned_only {
            filter.pinned = Some(true);
        }
        if let Some(tag) = &query.tag {
            if !is_self {
                return Err(ServiceError::Unauthorized(
                    "You must be authorized to view paste tags.".into(),
                ));
            }
            if !actor.has_scope(&[Scope::User, Scope::UserRead]) {
                return Err(ServiceError::Forbidden(format!(
                    "Missing required scope {} to view user tags.",
                    Scope::UserRead
                )));
            }
            filter.tag = Some(tag.clone());
        }

        // Expired pastes are left for `get`/`delete` to remove; they never count here.
        filter.live_at = Some(current_time());
        let total = self.store.count_pastes(&filter).await?;
        filter.skip = query.page.skip();
        filter.limit = Some(query.page.page_size);
        let found = self.store.find_pastes(&filter).await?;

        let mut items = Vec::with_capacity(found.len());
        for paste in found {
            let (data, language_stats) = match &paste.content {
                StoredContent::Plain { pasties, history } => {
                    let stats = language_stats(pasties, self.languages.as_ref());
                    let data = DecryptedPasteData {
                        pasties: pasties.clone(),
                        history: history.clone(),
                    };
                    (data, Some(stats))
                }
                StoredContent::Encrypted { .. } => (DecryptedPasteData::default(), None),
            };
            items.push(PasteWithLangStats {
                paste: read_model(paste, data, actor),
                language_stats,
            });
        }

        Ok(Page::new(items, query.page, total))
    }

    /// Distinct tags across the caller's own pastes.
    pub async fn owner_tags(&self, owner_id: &str, actor: &Actor) -> ServiceResult<Vec<String>> {
        if !actor.is_logged_in() {
            return Err(ServiceError::Unauthorized(
                "You must be authorized to get your own tags.".into(),
            ));
        }
        if !actor.owns(Some(owner_id)) {
            return Err(ServiceError::Unauthorized(
                "You can only fetch your own tags.".into(),
            ));
        }
        if !actor.has_scope(&[Scope::User, Scope::UserRead]) {
            return Err(ServiceError::Forbidden(format!(
                "Missing required scope {}.",
                Scope::UserRead
            )));
        }

        let pastes = self
            .store
            .find_pastes(&PasteFilter::owned_by(owner_id))
            .await?;
        Ok(normalize_tags(pastes.iter().flat_map(|p| p.tags.iter())))
    }

    pub async fn active_count(&self) -> ServiceResult<usize> {
        let live = PasteFilter {
            live_at: Some(current_time()),
            ..PasteFilter::default()
        };
        Ok(self.store.count_pastes(&live).await?)
    }
}

/// Builds the caller-facing view. Tags are only shown to the owner.
fn read_model(paste: StoredPaste, data: DecryptedPasteData, actor: &Actor) -> Paste {
    let show_tags = can_view_tags(actor, PasteAttributes::from(&paste));
    let edited_at = data.history.last().map(|h| h.edited_at);
    Paste {
        encrypted: paste.content.is_encrypted(),
        stars_count: paste.stars.len(),
        tags: if show_tags { paste.tags } else { Vec::new() },
        id: paste.id,
        title: paste.title,
        created_at: paste.created_at,
        expires_in: paste.expires_in,
        deletes_at: paste.deletes_at,
        owner_id: paste.owner_id,
        private: paste.private,
        pinned: paste.pinned,
        pasties: data.pasties,
        edited_at,
        history: data.history,
    }
}
