//! Static and dynamic introspection
//!
//! The inspector turns a function in Rust source into a `FunctionAnalysis`:
//! signature, parsed docs, dependency sets, performance/security hints, a
//! JSON schema for its parameters, and an MCP tool definition.
//!
//! Analyses are cached by identity. Invalidation is two cheap probes run on
//! every inspect: the source file's mtime, then (only when the mtime moved)
//! the function's token-stream hash. The expensive full analysis reruns
//! only when the hash actually changed.

pub mod docstring;
pub mod schema;
pub mod source;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use docstring::DocInfo;
pub use source::{
    discover, Dependencies, DiscoveredFunction, PerformanceHints, SecurityHints,
};

use crate::error::MysticError;
use crate::identity::FunctionIdentity;

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_text: Option<String>,
    /// JSON-schema fragment for this parameter's type.
    pub schema: Value,
    /// Rest-positional or rest-keyword parameter; omitted from the object
    /// schema and reflected via `additionalProperties`.
    pub is_rest: bool,
}

/// Runtime-visible signature of a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub name: String,
    pub module: String,
    pub qualname: String,
    pub params: Vec<ParamInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    pub is_async: bool,
    pub is_method: bool,
    pub is_public: bool,
    pub has_varargs: bool,
    pub has_kwargs: bool,
    /// Rendered `fn name(params) -> ret` form.
    pub text: String,
}

/// Complete analysis of one function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionAnalysis {
    pub identity: FunctionIdentity,
    pub signature: SignatureInfo,
    pub doc: DocInfo,
    pub dependencies: Dependencies,
    pub performance: PerformanceHints,
    pub security: SecurityHints,
    /// Hex digest of the item's canonical token stream; empty when the
    /// source was unavailable.
    pub ast_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Object schema over the parameters.
    pub schema: Value,
    pub return_schema: Value,
}

impl FunctionAnalysis {
    /// The MCP tool definition derived from signature + doc summary.
    pub fn mcp_tool(&self) -> Value {
        schema::mcp_tool(&self.signature, &self.doc)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

struct CachedAnalysis {
    mtime: Option<SystemTime>,
    ast_hash: String,
    analysis: Arc<FunctionAnalysis>,
}

/// Caching analysis front-end.
#[derive(Default)]
pub struct Inspector {
    cache: Mutex<HashMap<FunctionIdentity, CachedAnalysis>>,
}

impl Inspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyze `function` in `path`, reusing the cached analysis while the
    /// file's mtime and the function's token hash are unchanged.
    pub fn inspect_file(
        &self,
        path: &Path,
        function: &str,
    ) -> Result<Arc<FunctionAnalysis>, MysticError> {
        let module = module_name(path);
        let identity = FunctionIdentity::new(module.clone(), function);
        let mtime = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok();

        if let Ok(cache) = self.cache.lock() {
            if let Some(cached) = cache.get(&identity) {
                if cached.mtime.is_some() && cached.mtime == mtime {
                    return Ok(cached.analysis.clone());
                }
            }
        }

        let source = std::fs::read_to_string(path)
            .map_err(|e| MysticError::NotFound(format!("{}: {e}", path.display())))?;

        // Mtime moved; the hash decides whether a full re-analysis is due.
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(cached) = cache.get_mut(&identity) {
                if let Some(hash) = source::hash_function(&source, function) {
                    if hash == cached.ast_hash {
                        cached.mtime = mtime;
                        return Ok(cached.analysis.clone());
                    }
                }
            }
        }

        let mut analysis = self.inspect_source(&source, &module, function)?;
        analysis.source_file = Some(path.to_path_buf());
        let analysis = Arc::new(analysis);

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                identity,
                CachedAnalysis {
                    mtime,
                    ast_hash: analysis.ast_hash.clone(),
                    analysis: analysis.clone(),
                },
            );
        }
        Ok(analysis)
    }

    /// Analyze in-memory source. Uncached.
    pub fn inspect_source(
        &self,
        source: &str,
        module: &str,
        function: &str,
    ) -> Result<FunctionAnalysis, MysticError> {
        let parsed = source::analyze_source(source, module, function)?;
        let doc = docstring::parse(&parsed.doc_text);
        let object_schema = schema::object_schema(&parsed.signature);
        let return_schema = schema::return_schema(&parsed.signature);

        Ok(FunctionAnalysis {
            identity: FunctionIdentity::new(module, &parsed.signature.qualname),
            schema: object_schema,
            return_schema,
            doc,
            dependencies: parsed.dependencies,
            performance: parsed.performance,
            security: parsed.security,
            ast_hash: parsed.ast_hash,
            source_file: None,
            line: parsed.line,
            signature: parsed.signature,
        })
    }

    /// Fallback for callables whose source is unavailable: signature-only
    /// analysis with empty doc fields and an empty hash.
    pub fn signature_only(
        &self,
        identity: &FunctionIdentity,
        signature_text: Option<&str>,
        doc: Option<&str>,
    ) -> FunctionAnalysis {
        let signature = SignatureInfo {
            name: identity.qualname.clone(),
            module: identity.module.clone(),
            qualname: identity.qualname.clone(),
            params: Vec::new(),
            return_type: None,
            is_async: false,
            is_method: false,
            is_public: true,
            has_varargs: false,
            has_kwargs: false,
            text: signature_text
                .map(str::to_string)
                .unwrap_or_else(|| format!("fn {}(..)", identity.qualname)),
        };
        FunctionAnalysis {
            identity: identity.clone(),
            schema: schema::object_schema(&signature),
            return_schema: Value::Object(Default::default()),
            doc: doc.map(docstring::parse).unwrap_or_default(),
            dependencies: Dependencies::default(),
            performance: PerformanceHints::default(),
            security: SecurityHints::default(),
            ast_hash: String::new(),
            source_file: None,
            line: None,
            signature,
        }
    }

    /// Drop one cached analysis (or all of them).
    pub fn invalidate(&self, identity: Option<&FunctionIdentity>) {
        if let Ok(mut cache) = self.cache.lock() {
            match identity {
                Some(id) => {
                    cache.remove(id);
                }
                None => cache.clear(),
            }
        }
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

/// Convenience: object schema for a function in source text.
pub fn schema_of(source: &str, module: &str, function: &str) -> Result<Value, MysticError> {
    Inspector::new()
        .inspect_source(source, module, function)
        .map(|a| a.schema)
}

/// Convenience: MCP tool definition for a function in source text.
pub fn mcp_tool_of(source: &str, module: &str, function: &str) -> Result<Value, MysticError> {
    Inspector::new()
        .inspect_source(source, module, function)
        .map(|a| a.mcp_tool())
}

fn module_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
