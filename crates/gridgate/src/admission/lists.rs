//! Blacklist and whitelist of requester identities.
//!
//! Entries come from two optional JSON files (a local and a global one) of the form
//! `{"whitelist": [...], "blacklist": [...]}`. Entries are regular expressions matched against
//! the normalized identity of the requester.
use std::path::{Path, PathBuf};

use itertools::Itertools;
use regex::Regex;
use serde::Deserialize;

use crate::common::error::GridgateError;
use crate::define_wrapped_type;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ListFile {
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
}

impl ListFile {
    pub fn parse(data: &str) -> crate::Result<ListFile> {
        serde_json::from_str(data).map_err(|e| GridgateError::ListFileError(e.to_string()))
    }
}

/// Reads a list file. A missing file is not an error and yields `None`.
pub async fn read_list_file(path: &Path) -> crate::Result<Option<ListFile>> {
    match tokio::fs::read_to_string(path).await {
        Ok(data) => ListFile::parse(&data)
            .map(Some)
            .map_err(|e| GridgateError::ListFileError(format!("{}: {e}", path.display()))),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(GridgateError::ListFileError(format!(
            "Cannot read {}: {error}",
            path.display()
        ))),
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatternList {
    patterns: Vec<Regex>,
}

impl PatternList {
    /// Compiles the patterns; invalid ones are skipped.
    pub fn compile<'a>(patterns: impl IntoIterator<Item = &'a String>) -> Self {
        let patterns = patterns
            .into_iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(error) => {
                    log::warn!("Ignoring invalid list pattern `{pattern}`: {error}");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_match(&self, identity: &str) -> bool {
        self.patterns.iter().any(|regex| regex.is_match(identity))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|regex| regex.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccessLists {
    whitelist: PatternList,
    blacklist: PatternList,
}

impl AccessLists {
    /// Unions the entries of all files, keeping the first occurrence of each duplicate.
    pub fn merge<'a>(files: impl IntoIterator<Item = &'a ListFile> + Clone) -> Self {
        Self {
            whitelist: PatternList::compile(
                files.clone().into_iter().flat_map(|f| &f.whitelist).unique(),
            ),
            blacklist: PatternList::compile(
                files.into_iter().flat_map(|f| &f.blacklist).unique(),
            ),
        }
    }

    pub fn is_blacklisted(&self, identity: &str) -> bool {
        self.blacklist.is_match(identity)
    }

    pub fn is_whitelisted(&self, identity: &str) -> bool {
        self.whitelist.is_match(identity)
    }

    pub fn whitelist(&self) -> &PatternList {
        &self.whitelist
    }

    pub fn blacklist(&self) -> &PatternList {
        &self.blacklist
    }
}

/// Last successfully read content of one list file.
#[derive(Debug, Default)]
struct ListSource {
    path: Option<PathBuf>,
    content: Option<ListFile>,
}

impl ListSource {
    async fn refresh(path: Option<&Path>, previous: ListSource) -> ListSource {
        let Some(path) = path else {
            return ListSource::default();
        };
        let previous = if previous.path.as_deref() == Some(path) {
            previous.content
        } else {
            None
        };
        let content = match read_list_file(path).await {
            Ok(content) => content,
            Err(error) => {
                log::warn!("List refresh failed, keeping previous entries: {error}");
                previous
            }
        };
        ListSource {
            path: Some(path.to_path_buf()),
            content,
        }
    }
}

#[derive(Default)]
pub struct ListStore {
    lists: AccessLists,
    local: ListSource,
    global: ListSource,
}

define_wrapped_type!(ListStoreRef, ListStore, pub);

impl ListStore {
    pub fn with_lists(lists: AccessLists) -> Self {
        Self {
            lists,
            ..Default::default()
        }
    }

    pub fn lists(&self) -> &AccessLists {
        &self.lists
    }
}

impl ListStoreRef {
    /// Re-reads both list files and rebuilds the merged lists.
    pub async fn refresh(&self, local: Option<&Path>, global: Option<&Path>) {
        let (local_source, global_source) = {
            let mut store = self.get_mut();
            (
                std::mem::take(&mut store.local),
                std::mem::take(&mut store.global),
            )
        };
        let local_source = ListSource::refresh(local, local_source).await;
        let global_source = ListSource::refresh(global, global_source).await;

        let lists = AccessLists::merge(
            [&local_source.content, &global_source.content]
                .into_iter()
                .flatten(),
        );
        log::debug!(
            "Access lists refreshed: {} whitelist and {} blacklist pattern(s)",
            lists.whitelist().len(),
            lists.blacklist().len()
        );

        let mut store = self.get_mut();
        store.lists = lists;
        store.local = local_source;
        store.global = global_source;
    }
}
