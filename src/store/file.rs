//! 文件存储：每个配置节一个文件，位于 `<root>/<owner>/<section>.<ext>`

use crate::error::StoreError;
use crate::store::{ConfigDocument, DocumentIdentity, DocumentStore};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// 文档文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    #[default]
    Json,
    Toml,
}

impl DocumentFormat {
    /// 根据扩展名判断格式
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Toml => "toml",
        }
    }

    /// 解析文档内容
    pub fn parse(self, content: &str, path: &Path) -> Result<ConfigDocument, StoreError> {
        let parse_error = |reason: String| StoreError::Parse {
            path: path.to_path_buf(),
            reason,
        };

        match self {
            Self::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string())),
            Self::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
        }
    }

    /// 渲染文档
    ///
    /// TOML 没有空值，值为 `null` 的键不会写出，读回时回落到默认值。
    pub fn render(self, document: &ConfigDocument) -> Result<String, StoreError> {
        let serialize_error = |reason: String| StoreError::Serialize { reason };

        match self {
            Self::Json => {
                serde_json::to_string_pretty(document).map_err(|e| serialize_error(e.to_string()))
            }
            Self::Toml => {
                let mut document = document.clone();
                document.values.retain(|_, value| !value.is_null());
                toml::to_string_pretty(&document).map_err(|e| serialize_error(e.to_string()))
            }
        }
    }
}

/// 读取单个文档文件，格式由扩展名决定，无法判断时按 JSON 处理
pub fn read_document(path: &Path) -> Result<ConfigDocument, StoreError> {
    let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    DocumentFormat::from_path(path)
        .unwrap_or_default()
        .parse(&content, path)
}

/// 基于目录的文档存储
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    root: PathBuf,
    format: DocumentFormat,
}

impl FileDocumentStore {
    pub fn new(root: impl Into<PathBuf>, format: DocumentFormat) -> Self {
        Self {
            root: root.into(),
            format,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    /// 文档对应的文件路径
    pub fn path_for(&self, identity: &DocumentIdentity) -> PathBuf {
        self.root
            .join(sanitize_component(&identity.owner))
            .join(format!(
                "{}.{}",
                sanitize_component(&identity.section),
                self.format.extension()
            ))
    }
}

impl DocumentStore for FileDocumentStore {
    fn load(&self, identity: &DocumentIdentity) -> Result<Option<ConfigDocument>, StoreError> {
        let path = self.path_for(identity);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        self.format.parse(&content, &path).map(Some)
    }

    fn save(&self, identity: &DocumentIdentity, document: ConfigDocument) -> Result<(), StoreError> {
        let path = self.path_for(identity);
        let io_error = |path: &Path, source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }

        let content = self.format.render(&document)?;
        // 每次写入使用独立的临时文件，并发写入互不覆盖
        let temp_path = path.with_extension(format!(
            "{}.{}-{}.tmp",
            self.format.extension(),
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp_path, content).map_err(|e| io_error(&temp_path, e))?;
        fs::rename(&temp_path, &path).map_err(|e| io_error(&path, e))?;

        debug!("配置文档已写入: {}", path.display());
        Ok(())
    }
}

/// 把名称转换为安全的路径片段
fn sanitize_component(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = sanitized.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}
