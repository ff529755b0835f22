use common::{is_normalized_slug, slugify, ScopeMode, SlugScope, FALLBACK_SLUG};

use crate::LibraryError;

/// Lookup the allocator probes against. Implemented by the track store; tests
/// use an in-memory map.
pub trait SlugIndex {
    fn slug_in_use(
        &self,
        scope: &SlugScope,
        slug: &str,
        exclude: Option<u64>,
    ) -> Result<bool, LibraryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlugCheck {
    Unchanged,
    Available,
}

#[derive(Debug, Clone, Copy)]
pub struct SlugAllocator {
    mode: ScopeMode,
}

impl SlugAllocator {
    pub fn new(mode: ScopeMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ScopeMode {
        self.mode
    }

    pub fn scope_for(&self, owner: Option<&str>) -> SlugScope {
        self.mode.scope_for(owner)
    }

    /// Derives a slug from `label` that no track in `scope` holds yet,
    /// suffixing `-2`, `-3`, ... onto the base on collision.
    pub fn allocate_slug<I: SlugIndex + ?Sized>(
        &self,
        index: &I,
        label: &str,
        scope: &SlugScope,
    ) -> Result<String, LibraryError> {
        let base = base_slug(label);
        first_free(&base, |candidate| index.slug_in_use(scope, candidate, None))
    }

    /// Checks a slug the owner asked for at edit time. Collisions are
    /// rejected, never suffixed.
    pub fn validate_slug_change<I: SlugIndex + ?Sized>(
        &self,
        index: &I,
        scope: &SlugScope,
        track_id: u64,
        original: &str,
        proposed: &str,
    ) -> Result<SlugCheck, LibraryError> {
        if proposed == original {
            return Ok(SlugCheck::Unchanged);
        }
        if !is_normalized_slug(proposed) {
            return Err(LibraryError::InvalidSlug(proposed.to_string()));
        }
        if index.slug_in_use(scope, proposed, Some(track_id))? {
            return Err(LibraryError::SlugConflict(proposed.to_string()));
        }
        Ok(SlugCheck::Available)
    }
}

pub fn base_slug(label: &str) -> String {
    let slug = slugify(label);
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

pub(crate) fn suffixed(base: &str, counter: u32) -> String {
    format!("{}-{}", base, counter)
}

/// Probes `base`, then `base-2`, `base-3`, ... and returns the first candidate
/// `in_use` reports as free.
pub(crate) fn first_free<F>(base: &str, mut in_use: F) -> Result<String, LibraryError>
where
    F: FnMut(&str) -> Result<bool, LibraryError>,
{
    if !in_use(base)? {
        return Ok(base.to_string());
    }
    let mut counter: u32 = 2;
    loop {
        let candidate = suffixed(base, counter);
        if !in_use(&candidate)? {
            return Ok(candidate);
        }
        counter = counter
            .checked_add(1)
            .ok_or_else(|| LibraryError::SlugTaken(base.to_string()))?;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct MemoryIndex {
        slugs: HashMap<(String, String), u64>,
    }

    impl MemoryIndex {
        fn add(&mut self, scope: &SlugScope, slug: &str, id: u64) {
            self.slugs
                .insert((scope.key().to_string(), slug.to_string()), id);
        }

        fn remove(&mut self, scope: &SlugScope, slug: &str) {
            self.slugs.remove(&(scope.key().to_string(), slug.to_string()));
        }
    }

    impl SlugIndex for MemoryIndex {
        fn slug_in_use(
            &self,
            scope: &SlugScope,
            slug: &str,
            exclude: Option<u64>,
        ) -> Result<bool, LibraryError> {
            let key = (scope.key().to_string(), slug.to_string());
            Ok(match self.slugs.get(&key) {
                Some(id) => Some(*id) != exclude,
                None => false,
            })
        }
    }

    #[test]
    fn allocates_base_then_increasing_suffixes() {
        let allocator = SlugAllocator::new(ScopeMode::SingleUser);
        let scope = allocator.scope_for(None);
        let mut index = MemoryIndex::default();

        let mut seen = Vec::new();
        for id in 1..=4 {
            let slug = allocator.allocate_slug(&index, "My Song", &scope).unwrap();
            index.add(&scope, &slug, id);
            seen.push(slug);
        }
        assert_eq!(seen, vec!["my-song", "my-song-2", "my-song-3", "my-song-4"]);
    }

    #[test]
    fn lowest_free_suffix_wins() {
        let allocator = SlugAllocator::new(ScopeMode::SingleUser);
        let scope = allocator.scope_for(None);
        let mut index = MemoryIndex::default();
        index.add(&scope, "demo", 1);
        index.add(&scope, "demo-2", 2);
        index.add(&scope, "demo-3", 3);
        index.remove(&scope, "demo-2");

        let slug = allocator.allocate_slug(&index, "Demo", &scope).unwrap();
        assert_eq!(slug, "demo-2");
    }

    #[test]
    fn per_owner_scopes_do_not_collide() {
        let allocator = SlugAllocator::new(ScopeMode::MultiUser);
        let mut index = MemoryIndex::default();
        let alice = allocator.scope_for(Some("alice"));
        let bob = allocator.scope_for(Some("bob"));

        let first = allocator.allocate_slug(&index, "Intro", &alice).unwrap();
        index.add(&alice, &first, 1);
        let second = allocator.allocate_slug(&index, "Intro", &bob).unwrap();
        assert_eq!(first, "intro");
        assert_eq!(second, "intro");
    }

    #[test]
    fn global_scope_ignores_owner() {
        let allocator = SlugAllocator::new(ScopeMode::SingleUser);
        let mut index = MemoryIndex::default();
        let alice = allocator.scope_for(Some("alice"));
        let bob = allocator.scope_for(Some("bob"));

        let first = allocator.allocate_slug(&index, "Intro", &alice).unwrap();
        index.add(&alice, &first, 1);
        let second = allocator.allocate_slug(&index, "Intro", &bob).unwrap();
        assert_eq!(second, "intro-2");
    }

    #[test]
    fn unusable_label_falls_back() {
        let allocator = SlugAllocator::new(ScopeMode::SingleUser);
        let index = MemoryIndex::default();
        let slug = allocator
            .allocate_slug(&index, "!!!", &SlugScope::Global)
            .unwrap();
        assert_eq!(slug, FALLBACK_SLUG);
    }

    #[test]
    fn slug_change_rules() {
        let allocator = SlugAllocator::new(ScopeMode::SingleUser);
        let scope = SlugScope::Global;
        let mut index = MemoryIndex::default();
        index.add(&scope, "first", 1);
        index.add(&scope, "second", 2);

        let check = allocator.validate_slug_change(&index, &scope, 1, "first", "first");
        assert_eq!(check.unwrap(), SlugCheck::Unchanged);

        let check = allocator.validate_slug_change(&index, &scope, 1, "first", "fresh");
        assert_eq!(check.unwrap(), SlugCheck::Available);

        let check = allocator.validate_slug_change(&index, &scope, 1, "first", "second");
        assert!(matches!(check, Err(LibraryError::SlugConflict(slug)) if slug == "second"));

        let check = allocator.validate_slug_change(&index, &scope, 1, "first", "Not A Slug");
        assert!(matches!(check, Err(LibraryError::InvalidSlug(_))));
    }

    #[test]
    fn own_slug_does_not_conflict() {
        let allocator = SlugAllocator::new(ScopeMode::SingleUser);
        let scope = SlugScope::Global;
        let mut index = MemoryIndex::default();
        index.add(&scope, "mine", 7);

        // The record was loaded with a stale original; its own row is excluded.
        let check = allocator.validate_slug_change(&index, &scope, 7, "older", "mine");
        assert_eq!(check.unwrap(), SlugCheck::Available);
    }
}
