//! Workspace enumeration shared by ingestion, exact search and the tools.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "java", "cpp", "c", "h", "cs", "go", "rs", "php", "rb",
    "swift", "json", "yaml", "yml", "toml", "xml", "html", "css", "scss", "sql", "md", "txt",
    "pdf",
];

pub const DEFAULT_IGNORE_DIRS: &[&str] = &[
    "venv",
    ".venv",
    "env",
    "__pycache__",
    ".git",
    ".idea",
    ".vscode",
    "node_modules",
    "site-packages",
    "dist-packages",
    "build",
    "dist",
    "bin",
    "obj",
    "target",
    "include",
    "lib",
];

pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

const BINARY_SNIFF_LEN: usize = 8 * 1024;

/// Why a file was left out of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooLarge,
    Binary,
    /// A document format this build cannot extract.
    Unsupported,
}

#[derive(Debug)]
pub enum FileContent {
    Text(String),
    Skipped(SkipReason),
}

/// A workspace root plus the rules deciding which files are eligible.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    extensions: Arc<HashSet<String>>,
    ignore_dirs: Arc<HashSet<String>>,
    max_file_size: u64,
}

impl Workspace {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: Arc::new(DEFAULT_EXTENSIONS.iter().map(|s| (*s).to_owned()).collect()),
            ignore_dirs: Arc::new(DEFAULT_IGNORE_DIRS.iter().map(|s| (*s).to_owned()).collect()),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    /// Extensions may be given with or without the leading dot.
    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = Arc::new(
            extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        );
        self
    }

    #[must_use]
    pub fn with_ignore_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ignore_dirs = Arc::new(dirs.into_iter().map(|d| d.as_ref().to_owned()).collect());
        self
    }

    #[must_use]
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(&e.to_ascii_lowercase()))
    }

    /// Every eligible file under the root as sorted `/`-separated relative paths.
    #[must_use]
    pub fn files(&self) -> Vec<String> {
        self.files_under(&self.root)
    }

    /// Eligible files below `dir`, which must lie inside the root.
    #[must_use]
    pub fn files_under(&self, dir: &Path) -> Vec<String> {
        let ignore_dirs = Arc::clone(&self.ignore_dirs);
        let walker = ignore::WalkBuilder::new(dir)
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
                !(is_dir
                    && entry.depth() > 0
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| ignore_dirs.contains(name)))
            })
            .build();

        let mut files: Vec<String> = walker
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable workspace entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()) && self.is_supported(e.path()))
            .filter_map(|e| self.relative(e.path()))
            .collect();
        files.sort();
        files
    }

    /// `/`-separated path of `path` relative to the root.
    #[must_use]
    pub fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    #[must_use]
    pub fn absolute(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Read a workspace file as text, applying size and binary rules.
    ///
    /// # Errors
    ///
    /// Returns the IO error if the file cannot be read.
    pub async fn read_text(&self, rel: &str) -> std::io::Result<FileContent> {
        let path = self.absolute(rel);
        let meta = tokio::fs::metadata(&path).await?;
        if meta.len() > self.max_file_size {
            return Ok(FileContent::Skipped(SkipReason::TooLarge));
        }
        load_text(&path).await
    }
}

/// Read `path` as text. PDFs go through text extraction; anything else must
/// pass [`decode_text`].
///
/// # Errors
///
/// Returns an error if the file cannot be read, or a PDF cannot be parsed.
pub async fn load_text(path: &Path) -> std::io::Result<FileContent> {
    if is_pdf(path) {
        return load_pdf(path).await;
    }
    let bytes = tokio::fs::read(path).await?;
    Ok(decode_text(bytes))
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

#[cfg(feature = "pdf")]
async fn load_pdf(path: &Path) -> std::io::Result<FileContent> {
    crate::pdf::extract_text(path).await.map(FileContent::Text)
}

#[cfg(not(feature = "pdf"))]
async fn load_pdf(_path: &Path) -> std::io::Result<FileContent> {
    Ok(FileContent::Skipped(SkipReason::Unsupported))
}

/// Text if `bytes` has no NUL in its first 8 KiB and is valid UTF-8.
#[must_use]
pub fn decode_text(bytes: Vec<u8>) -> FileContent {
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    if sniff.contains(&0) {
        return FileContent::Skipped(SkipReason::Binary);
    }
    match String::from_utf8(bytes) {
        Ok(text) => FileContent::Text(text),
        Err(_) => FileContent::Skipped(SkipReason::Binary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn lists_supported_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", b"fn main() {}");
        write(dir.path(), "README.md", b"# hi");
        write(dir.path(), "image.png", b"\x89PNG");
        write(dir.path(), "node_modules/pkg/index.js", b"x");
        write(dir.path(), "target/debug/out.rs", b"x");
        write(dir.path(), ".hidden/secret.py", b"x");

        let ws = Workspace::new(dir.path());
        assert_eq!(ws.files(), vec!["README.md", "src/main.rs"]);
    }

    #[test]
    fn respects_gitignore_without_repo() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", b"generated.rs\n");
        write(dir.path(), "generated.rs", b"x");
        write(dir.path(), "kept.rs", b"x");
        assert_eq!(Workspace::new(dir.path()).files(), vec!["kept.rs"]);
    }

    #[test]
    fn custom_extensions_accept_dotted_form() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.rs", b"x");
        write(dir.path(), "b.py", b"x");
        let ws = Workspace::new(dir.path()).with_extensions([".PY"]);
        assert_eq!(ws.files(), vec!["b.py"]);
    }

    #[test]
    fn decode_rejects_nul_and_invalid_utf8() {
        assert!(matches!(
            decode_text(b"ab\0cd".to_vec()),
            FileContent::Skipped(SkipReason::Binary)
        ));
        assert!(matches!(
            decode_text(vec![0xff, 0xfe, 0x41]),
            FileContent::Skipped(SkipReason::Binary)
        ));
        assert!(matches!(decode_text(b"plain".to_vec()), FileContent::Text(t) if t == "plain"));
    }

    #[cfg(feature = "pdf")]
    #[tokio::test]
    async fn pdf_is_listed_and_read_as_text() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "docs/Guide.PDF", &crate::pdf::sample_pdf("DeployChecklist"));
        let ws = Workspace::new(dir.path());
        assert_eq!(ws.files(), vec!["docs/Guide.PDF"]);

        match ws.read_text("docs/Guide.PDF").await.unwrap() {
            FileContent::Text(text) => assert!(text.contains("DeployChecklist"), "{text:?}"),
            FileContent::Skipped(reason) => panic!("pdf skipped: {reason:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "big.txt", &[b'a'; 64]);
        let ws = Workspace::new(dir.path()).with_max_file_size(16);
        assert!(matches!(
            ws.read_text("big.txt").await.unwrap(),
            FileContent::Skipped(SkipReason::TooLarge)
        ));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        assert!(ws.read_text("nope.rs").await.is_err());
    }
}
