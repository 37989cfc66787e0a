//! Shared page set fed by generators and consumed by page-level modules.

use std::collections::HashSet;

use serde::Serialize;

use crate::title::Title;

/// Identifies a page by id, by title, or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRef {
    pub page_id: Option<i64>,
    pub title: Option<Title>,
}

impl PageRef {
    pub fn page(page_id: i64, namespace: i64, dbkey: &str) -> Self {
        Self {
            page_id: Some(page_id),
            title: Some(Title {
                namespace,
                dbkey: dbkey.to_string(),
            }),
        }
    }

    pub fn by_id(page_id: i64) -> Self {
        Self {
            page_id: Some(page_id),
            title: None,
        }
    }

    pub fn by_title(namespace: i64, dbkey: &str) -> Self {
        Self {
            page_id: None,
            title: Some(Title {
                namespace,
                dbkey: dbkey.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageSet {
    pages: Vec<PageRef>,
    seen_ids: HashSet<i64>,
    seen_titles: HashSet<Title>,
    capacity: usize,
}

impl PageSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            pages: Vec::new(),
            seen_ids: HashSet::new(),
            seen_titles: HashSet::new(),
            capacity,
        }
    }

    /// Returns false when the page is new and the set is full. Pages already
    /// present are accepted without growing the set.
    pub fn add(&mut self, page: PageRef) -> bool {
        if self.contains(&page) {
            return true;
        }
        if self.pages.len() >= self.capacity {
            return false;
        }
        if let Some(id) = page.page_id {
            self.seen_ids.insert(id);
        }
        if let Some(title) = &page.title {
            self.seen_titles.insert(title.clone());
        }
        self.pages.push(page);
        true
    }

    pub fn contains(&self, page: &PageRef) -> bool {
        if let Some(id) = page.page_id
            && self.seen_ids.contains(&id)
        {
            return true;
        }
        match (&page.title, page.page_id) {
            (Some(title), None) => self.seen_titles.contains(title),
            _ => false,
        }
    }

    pub fn pages(&self) -> &[PageRef] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Decides when a generator answers with a restart hint instead of a
/// resumable token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorPolicy {
    pub restart_volatile_on_cap: bool,
}

impl Default for GeneratorPolicy {
    fn default() -> Self {
        Self {
            restart_volatile_on_cap: true,
        }
    }
}

impl GeneratorPolicy {
    /// Only the first batch of a volatile traversal that hit the page-set cap restarts.
    pub fn should_restart(&self, volatile: bool, resumed: bool, cap_hit: bool) -> bool {
        self.restart_volatile_on_cap && volatile && !resumed && cap_hit
    }
}

#[cfg(test)]
mod tests {
    use super::{GeneratorPolicy, PageRef, PageSet};

    #[test]
    fn deduplicates_by_id_and_by_title() {
        let mut set = PageSet::new(3);
        assert!(set.add(PageRef::page(1, 0, "Alpha")));
        assert!(set.add(PageRef::by_id(1)));
        assert!(set.add(PageRef::by_title(0, "Beta")));
        assert!(set.add(PageRef::by_title(0, "Beta")));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn refuses_new_pages_when_full() {
        let mut set = PageSet::new(1);
        assert!(set.add(PageRef::page(1, 0, "Alpha")));
        assert!(!set.add(PageRef::page(2, 0, "Beta")));
        assert!(set.add(PageRef::page(1, 0, "Alpha")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn restart_only_for_first_volatile_batch_at_cap() {
        let policy = GeneratorPolicy::default();
        assert!(policy.should_restart(true, false, true));
        assert!(!policy.should_restart(true, true, true));
        assert!(!policy.should_restart(false, false, true));
        assert!(!policy.should_restart(true, false, false));

        let disabled = GeneratorPolicy {
            restart_volatile_on_cap: false,
        };
        assert!(!disabled.should_restart(true, false, true));
    }
}
