//! Resource loading.
//!
//! Templates and stylesheets referenced by URL are fetched through a
//! [`ResourceLoader`]. Two loaders are provided: an in-memory one with
//! per-URL latency control, and one serving a directory tree.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::future::{self, FutureExt, LocalBoxFuture};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::error::{CompileError, Result};

pub trait ResourceLoader {
    fn get(&self, url: &str) -> LocalBoxFuture<'static, Result<String>>;
}

/// Resolve `url` against the URL of the resource that referenced it.
/// Absolute URLs (leading `/` or a scheme) are returned unchanged.
pub fn resolve_url(base: Option<&str>, url: &str) -> String {
    if url.starts_with('/') || url.contains("://") {
        return url.to_string();
    }
    let mut segments: Vec<&str> = match base {
        Some(base) => {
            let mut parts: Vec<&str> = base.split('/').collect();
            parts.pop();
            parts
        }
        None => Vec::new(),
    };
    for part in url.split('/') {
        match part {
            "." | "" => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Completes after being polled `remaining + 1` times.
pub struct YieldNow {
    remaining: usize,
}

impl YieldNow {
    pub fn times(remaining: usize) -> Self {
        Self { remaining }
    }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.remaining == 0 {
            Poll::Ready(())
        } else {
            self.remaining -= 1;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY LOADER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct MemoryState {
    files: HashMap<String, String>,
    delays: HashMap<String, usize>,
    requests: Vec<String>,
}

/// Loader over a fixed set of files. Clones share state, so a test can keep
/// a handle to inspect requests after handing the loader to a compiler.
#[derive(Clone, Default)]
pub struct InMemoryResourceLoader {
    state: Rc<RefCell<MemoryState>>,
}

impl InMemoryResourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, url: &str, content: &str) -> Self {
        self.insert(url, content);
        self
    }

    pub fn insert(&self, url: &str, content: &str) {
        self.state
            .borrow_mut()
            .files
            .insert(url.to_string(), content.to_string());
    }

    /// Make fetches of `url` suspend `polls` times before completing.
    pub fn set_delay(&self, url: &str, polls: usize) {
        self.state.borrow_mut().delays.insert(url.to_string(), polls);
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.state
            .borrow()
            .requests
            .iter()
            .filter(|r| r.as_str() == url)
            .count()
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.borrow().requests.clone()
    }
}

impl ResourceLoader for InMemoryResourceLoader {
    fn get(&self, url: &str) -> LocalBoxFuture<'static, Result<String>> {
        let mut state = self.state.borrow_mut();
        state.requests.push(url.to_string());
        let delay = state.delays.get(url).copied().unwrap_or(0);
        let result = state
            .files
            .get(url)
            .cloned()
            .ok_or_else(|| CompileError::fetch(url, "not found"));
        trace!(url, delay, "in-memory fetch");
        async move {
            YieldNow::times(delay).await;
            result
        }
        .boxed_local()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIRECTORY LOADER
// ═══════════════════════════════════════════════════════════════════════════════

/// Serves the files below a root directory by their `/`-separated relative
/// path. The tree is indexed once on construction.
pub struct DirectoryResourceLoader {
    root: PathBuf,
    index: HashMap<String, PathBuf>,
}

impl DirectoryResourceLoader {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut index = HashMap::new();
        for entry in WalkDir::new(&root).follow_links(true) {
            let entry = entry.map_err(|e| CompileError::fetch(&root.display().to_string(), e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&root) {
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                index.insert(key, entry.path().to_path_buf());
            }
        }
        debug!(root = %root.display(), files = index.len(), "indexed resource directory");
        Ok(Self { root, index })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn contains(&self, url: &str) -> bool {
        self.index.contains_key(normalize_key(url))
    }
}

fn normalize_key(url: &str) -> &str {
    url.trim_start_matches("./").trim_start_matches('/')
}

impl ResourceLoader for DirectoryResourceLoader {
    fn get(&self, url: &str) -> LocalBoxFuture<'static, Result<String>> {
        let result = match self.index.get(normalize_key(url)) {
            Some(path) => {
                std::fs::read_to_string(path).map_err(|e| CompileError::fetch(url, e.to_string()))
            }
            None => Err(CompileError::fetch(url, "not found")),
        };
        future::ready(result).boxed_local()
    }
}
