//! Source-level function analysis
//!
//! Parses Rust source with `syn`, locates the requested `fn` item (free
//! functions and inherent methods), and derives the signature, dependency
//! sets, complexity/security hints, and a change-detection hash from the
//! item's canonical token stream.
//!
//! Called names and read-side globals are approximations from the AST, the
//! same way a grep-level reader would collect them; they are advisory, not
//! a resolved call graph.

use std::path::{Path, PathBuf};

use quote::ToTokens;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use syn::spanned::Spanned;
use syn::visit::Visit;
use tracing::debug;
use walkdir::WalkDir;

use super::schema::{self, type_text};
use super::{ParamInfo, SignatureInfo};
use crate::error::MysticError;

/// Names referenced by a function body, grouped by how they are reached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependencies {
    /// Attribute names on the item (decorator analogue).
    pub attributes: Vec<String>,
    /// Flattened `use` paths of the surrounding file.
    pub imports: Vec<String>,
    /// Called function and method names.
    pub calls: Vec<String>,
    /// Read-side identifiers that look like globals (multi-segment paths
    /// and SCREAMING_CASE names).
    pub globals: Vec<String>,
    /// Closure parameter lists found in the body.
    pub closures: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceHints {
    pub recursive: bool,
    pub has_loops: bool,
    pub cyclomatic_complexity: u32,
    pub loc: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityHints {
    pub has_unsafe: bool,
    pub spawns_processes: bool,
    pub uses_transmute: bool,
    pub reads_env: bool,
    pub removes_files: bool,
}

/// Everything the AST pass produces for one function.
#[derive(Debug, Clone)]
pub struct SourceAnalysis {
    pub signature: SignatureInfo,
    pub doc_text: String,
    pub dependencies: Dependencies,
    pub performance: PerformanceHints,
    pub security: SecurityHints,
    pub ast_hash: String,
    pub line: Option<u32>,
}

/// Analyze `function` inside `source`. Inherent methods are addressed as
/// `Type::method`.
pub fn analyze_source(
    source: &str,
    module: &str,
    function: &str,
) -> Result<SourceAnalysis, MysticError> {
    let file = syn::parse_file(source)
        .map_err(|e| MysticError::Config(format!("cannot parse source: {e}")))?;

    let imports = collect_imports(&file);
    let found = find_function(&file.items, function)
        .ok_or_else(|| MysticError::NotFound(format!("{module}::{function}")))?;

    let signature = signature_info(&found, module);
    let doc_text = extract_docs(&found.attrs);

    let mut visitor = BodyVisitor::new(&found.sig.ident.to_string());
    visitor.visit_block(&found.block);

    let mut dependencies = Dependencies {
        attributes: found
            .attrs
            .iter()
            .filter(|a| !a.path().is_ident("doc"))
            .map(|a| path_string(a.path()))
            .collect(),
        imports,
        calls: visitor.calls,
        globals: visitor.globals,
        closures: visitor.closures,
    };
    dependencies.calls.dedup();
    dependencies.globals.sort_unstable();
    dependencies.globals.dedup();

    let token_text = found.to_token_text();
    let mut hasher = Sha256::new();
    hasher.update(token_text.as_bytes());
    let ast_hash = format!("{:x}", hasher.finalize());

    let start_line = found.sig.span().start().line;
    let loc = count_loc(source, &found);

    Ok(SourceAnalysis {
        signature,
        doc_text,
        dependencies,
        performance: PerformanceHints {
            recursive: visitor.recursive,
            has_loops: visitor.has_loops,
            cyclomatic_complexity: visitor.complexity,
            loc,
        },
        security: SecurityHints {
            has_unsafe: visitor.has_unsafe,
            spawns_processes: visitor.spawns_processes,
            uses_transmute: visitor.uses_transmute,
            reads_env: visitor.reads_env,
            removes_files: visitor.removes_files,
        },
        ast_hash,
        line: Some(start_line as u32),
    })
}

/// Compute only the change-detection hash, the cheap invalidation probe.
pub fn hash_function(source: &str, function: &str) -> Option<String> {
    let file = syn::parse_file(source).ok()?;
    let found = find_function(&file.items, function)?;
    let mut hasher = Sha256::new();
    hasher.update(found.to_token_text().as_bytes());
    Some(format!("{:x}", hasher.finalize()))
}

/// A located function: its signature, attributes, body, and owner type for
/// methods.
struct FoundFn<'a> {
    sig: &'a syn::Signature,
    attrs: &'a [syn::Attribute],
    block: &'a syn::Block,
    owner: Option<String>,
    is_public: bool,
}

impl FoundFn<'_> {
    fn to_token_text(&self) -> String {
        let mut text = String::new();
        for attr in self.attrs {
            text.push_str(&attr.to_token_stream().to_string());
        }
        text.push_str(&self.sig.to_token_stream().to_string());
        text.push_str(&self.block.to_token_stream().to_string());
        text
    }
}

fn find_function<'a>(items: &'a [syn::Item], target: &str) -> Option<FoundFn<'a>> {
    // Methods are addressed as Type::method.
    let (want_owner, want_name) = match target.rsplit_once("::") {
        Some((ty, name)) => (Some(ty), name),
        None => (None, target),
    };

    for item in items {
        match item {
            syn::Item::Fn(func) => {
                if func.sig.ident == want_name && want_owner.is_none() {
                    return Some(FoundFn {
                        sig: &func.sig,
                        attrs: &func.attrs,
                        block: &func.block,
                        owner: None,
                        is_public: matches!(func.vis, syn::Visibility::Public(_)),
                    });
                }
            }
            syn::Item::Impl(imp) => {
                let self_ty = type_text(&imp.self_ty);
                if let Some(want) = want_owner {
                    if want != self_ty {
                        continue;
                    }
                }
                for impl_item in &imp.items {
                    if let syn::ImplItem::Fn(method) = impl_item {
                        if method.sig.ident == want_name && want_owner.is_some() {
                            return Some(FoundFn {
                                sig: &method.sig,
                                attrs: &method.attrs,
                                block: &method.block,
                                owner: Some(self_ty.clone()),
                                is_public: matches!(method.vis, syn::Visibility::Public(_)),
                            });
                        }
                    }
                }
            }
            syn::Item::Mod(module) => {
                if let Some((_, nested)) = &module.content {
                    if let Some(found) = find_function(nested, target) {
                        return Some(found);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn signature_info(found: &FoundFn<'_>, module: &str) -> SignatureInfo {
    let sig = found.sig;
    let name = sig.ident.to_string();
    let qualname = match &found.owner {
        Some(owner) => format!("{owner}::{name}"),
        None => name.clone(),
    };

    let mut params = Vec::new();
    let mut is_method = false;
    let mut has_varargs = false;
    let mut has_kwargs = false;

    for input in &sig.inputs {
        match input {
            syn::FnArg::Receiver(_) => {
                is_method = true;
            }
            syn::FnArg::Typed(pat_type) => {
                let param_name = match pat_type.pat.as_ref() {
                    syn::Pat::Ident(ident) => ident.ident.to_string(),
                    other => other.to_token_stream().to_string(),
                };
                let text = type_text(&pat_type.ty);
                let varargs = is_varargs(&param_name, &text);
                let kwargs = is_kwargs(&param_name, &text);
                has_varargs |= varargs;
                has_kwargs |= kwargs;
                params.push(schema::param_info(
                    &param_name,
                    &pat_type.ty,
                    varargs || kwargs,
                ));
            }
        }
    }

    let return_type = match &sig.output {
        syn::ReturnType::Default => None,
        syn::ReturnType::Type(_, ty) => Some(type_text(ty)),
    };

    let rendered = render_signature(&name, is_method, &params, return_type.as_deref());

    SignatureInfo {
        name,
        module: module.to_string(),
        qualname,
        params,
        return_type,
        is_async: sig.asyncness.is_some(),
        is_method,
        is_public: found.is_public,
        has_varargs,
        has_kwargs,
        text: rendered,
    }
}

/// Trailing `args: Vec<Value>` / `args: &[Value]` is the rest-positional
/// convention.
fn is_varargs(name: &str, type_text: &str) -> bool {
    name == "args" && (type_text.contains("Vec<Value>") || type_text.contains("[Value]"))
}

/// Trailing `kwargs: BTreeMap<String, Value>` (or HashMap) is the
/// rest-keyword convention.
fn is_kwargs(name: &str, type_text: &str) -> bool {
    name == "kwargs"
        && (type_text.contains("Map<String, Value>") || type_text.contains("Map<String,Value>"))
}

fn render_signature(
    name: &str,
    is_method: bool,
    params: &[ParamInfo],
    return_type: Option<&str>,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    if is_method {
        parts.push("&self".to_string());
    }
    for param in params {
        match &param.type_text {
            Some(ty) => parts.push(format!("{}: {}", param.name, ty)),
            None => parts.push(param.name.clone()),
        }
    }
    match return_type {
        Some(ret) => format!("fn {name}({}) -> {ret}", parts.join(", ")),
        None => format!("fn {name}({})", parts.join(", ")),
    }
}

/// Join `#[doc = "..."]` attributes back into the comment body.
pub fn extract_docs(attrs: &[syn::Attribute]) -> String {
    let mut lines = Vec::new();
    for attr in attrs {
        if !attr.path().is_ident("doc") {
            continue;
        }
        if let syn::Meta::NameValue(nv) = &attr.meta {
            if let syn::Expr::Lit(syn::ExprLit {
                lit: syn::Lit::Str(text),
                ..
            }) = &nv.value
            {
                let raw = text.value();
                lines.push(raw.strip_prefix(' ').unwrap_or(&raw).to_string());
            }
        }
    }
    lines.join("\n")
}

fn collect_imports(file: &syn::File) -> Vec<String> {
    let mut imports = Vec::new();
    for item in &file.items {
        if let syn::Item::Use(item_use) = item {
            flatten_use_tree(&item_use.tree, String::new(), &mut imports);
        }
    }
    imports
}

fn flatten_use_tree(tree: &syn::UseTree, prefix: String, out: &mut Vec<String>) {
    match tree {
        syn::UseTree::Path(path) => {
            let next = if prefix.is_empty() {
                path.ident.to_string()
            } else {
                format!("{prefix}::{}", path.ident)
            };
            flatten_use_tree(&path.tree, next, out);
        }
        syn::UseTree::Name(name) => {
            if prefix.is_empty() {
                out.push(name.ident.to_string());
            } else {
                out.push(format!("{prefix}::{}", name.ident));
            }
        }
        syn::UseTree::Rename(rename) => {
            out.push(format!("{prefix}::{}", rename.ident));
        }
        syn::UseTree::Glob(_) => {
            out.push(format!("{prefix}::*"));
        }
        syn::UseTree::Group(group) => {
            for item in &group.items {
                flatten_use_tree(item, prefix.clone(), out);
            }
        }
    }
}

fn path_string(path: &syn::Path) -> String {
    path.segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect::<Vec<_>>()
        .join("::")
}

struct BodyVisitor {
    fn_name: String,
    calls: Vec<String>,
    globals: Vec<String>,
    closures: Vec<String>,
    complexity: u32,
    has_loops: bool,
    recursive: bool,
    has_unsafe: bool,
    spawns_processes: bool,
    uses_transmute: bool,
    reads_env: bool,
    removes_files: bool,
}

impl BodyVisitor {
    fn new(fn_name: &str) -> Self {
        Self {
            fn_name: fn_name.to_string(),
            calls: Vec::new(),
            globals: Vec::new(),
            closures: Vec::new(),
            complexity: 1,
            has_loops: false,
            recursive: false,
            has_unsafe: false,
            spawns_processes: false,
            uses_transmute: false,
            reads_env: false,
            removes_files: false,
        }
    }

    fn note_call(&mut self, path: &str) {
        if path.ends_with(&self.fn_name)
            && (path == self.fn_name || path.ends_with(&format!("::{}", self.fn_name)))
        {
            self.recursive = true;
        }
        if path.contains("transmute") {
            self.uses_transmute = true;
        }
        if path.contains("Command::new") || path.contains("process::Command") {
            self.spawns_processes = true;
        }
        if path.contains("env::var") || path.contains("env::vars") {
            self.reads_env = true;
        }
        if path.contains("remove_file") || path.contains("remove_dir") {
            self.removes_files = true;
        }
        self.calls.push(path.to_string());
    }
}

impl<'ast> Visit<'ast> for BodyVisitor {
    fn visit_expr_call(&mut self, node: &'ast syn::ExprCall) {
        if let syn::Expr::Path(path) = node.func.as_ref() {
            self.note_call(&path_string(&path.path));
        }
        syn::visit::visit_expr_call(self, node);
    }

    fn visit_expr_method_call(&mut self, node: &'ast syn::ExprMethodCall) {
        self.note_call(&node.method.to_string());
        syn::visit::visit_expr_method_call(self, node);
    }

    fn visit_expr_path(&mut self, node: &'ast syn::ExprPath) {
        let rendered = path_string(&node.path);
        if node.path.segments.len() > 1 {
            self.globals.push(rendered);
        } else if rendered.len() > 1
            && rendered
                .chars()
                .all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit())
        {
            self.globals.push(rendered);
        }
        syn::visit::visit_expr_path(self, node);
    }

    fn visit_expr_if(&mut self, node: &'ast syn::ExprIf) {
        self.complexity += 1;
        syn::visit::visit_expr_if(self, node);
    }

    fn visit_expr_while(&mut self, node: &'ast syn::ExprWhile) {
        self.complexity += 1;
        self.has_loops = true;
        syn::visit::visit_expr_while(self, node);
    }

    fn visit_expr_for_loop(&mut self, node: &'ast syn::ExprForLoop) {
        self.complexity += 1;
        self.has_loops = true;
        syn::visit::visit_expr_for_loop(self, node);
    }

    fn visit_expr_loop(&mut self, node: &'ast syn::ExprLoop) {
        self.has_loops = true;
        syn::visit::visit_expr_loop(self, node);
    }

    fn visit_expr_match(&mut self, node: &'ast syn::ExprMatch) {
        self.complexity += node.arms.len().saturating_sub(1) as u32;
        syn::visit::visit_expr_match(self, node);
    }

    fn visit_expr_binary(&mut self, node: &'ast syn::ExprBinary) {
        if matches!(node.op, syn::BinOp::And(_) | syn::BinOp::Or(_)) {
            self.complexity += 1;
        }
        syn::visit::visit_expr_binary(self, node);
    }

    fn visit_expr_unsafe(&mut self, node: &'ast syn::ExprUnsafe) {
        self.has_unsafe = true;
        syn::visit::visit_expr_unsafe(self, node);
    }

    fn visit_expr_closure(&mut self, node: &'ast syn::ExprClosure) {
        let params = node
            .inputs
            .iter()
            .map(|p| p.to_token_stream().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.closures.push(format!("|{params}|"));
        syn::visit::visit_expr_closure(self, node);
    }
}

fn count_loc(source: &str, found: &FoundFn<'_>) -> u32 {
    let start = found.sig.span().start().line;
    let end = found.block.span().end().line;
    if start == 0 || end < start {
        return 0;
    }
    source
        .lines()
        .skip(start - 1)
        .take(end - start + 1)
        .filter(|line| !line.trim().is_empty())
        .count() as u32
}

// ---------------------------------------------------------------------------
// Discovery

/// One function found by the discovery walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredFunction {
    pub name: String,
    pub module: String,
    pub full_name: String,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    pub file: PathBuf,
    pub line: u32,
    pub is_async: bool,
    pub is_public: bool,
}

impl DiscoveredFunction {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Walk a source tree and list every function. Unreadable or unparsable
/// files are skipped with a debug log, not fatal.
pub fn discover(
    root: &Path,
    module_filter: Option<&str>,
    include_private: bool,
) -> Result<Vec<DiscoveredFunction>, MysticError> {
    if !root.exists() {
        return Err(MysticError::NotFound(format!(
            "source root {}",
            root.display()
        )));
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|x| x == "rs").unwrap_or(false))
    {
        let path = entry.path();
        let module = module_path(root, path);
        if let Some(filter) = module_filter {
            if !module.contains(filter) {
                continue;
            }
        }
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                debug!("discovery: cannot read {}: {e}", path.display());
                continue;
            }
        };
        let file = match syn::parse_file(&source) {
            Ok(file) => file,
            Err(e) => {
                debug!("discovery: cannot parse {}: {e}", path.display());
                continue;
            }
        };
        collect_functions(
            &file.items,
            &module,
            path,
            include_private,
            None,
            &mut found,
        );
    }
    found.sort_by(|a, b| a.full_name.cmp(&b.full_name));
    Ok(found)
}

fn module_path(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let mut parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if let Some(last) = parts.last_mut() {
        *last = last.trim_end_matches(".rs").to_string();
    }
    if parts.last().map(|p| p == "mod" || p == "lib" || p == "main") == Some(true) {
        parts.pop();
    }
    parts.join("::")
}

fn collect_functions(
    items: &[syn::Item],
    module: &str,
    file: &Path,
    include_private: bool,
    owner: Option<&str>,
    out: &mut Vec<DiscoveredFunction>,
) {
    for item in items {
        match item {
            syn::Item::Fn(func) => {
                let is_public = matches!(func.vis, syn::Visibility::Public(_));
                if !is_public && !include_private {
                    continue;
                }
                out.push(discovered(
                    &func.sig,
                    &func.attrs,
                    module,
                    file,
                    owner,
                    is_public,
                ));
            }
            syn::Item::Impl(imp) => {
                let self_ty = type_text(&imp.self_ty);
                for impl_item in &imp.items {
                    if let syn::ImplItem::Fn(method) = impl_item {
                        let is_public = matches!(method.vis, syn::Visibility::Public(_));
                        if !is_public && !include_private {
                            continue;
                        }
                        out.push(discovered(
                            &method.sig,
                            &method.attrs,
                            module,
                            file,
                            Some(&self_ty),
                            is_public,
                        ));
                    }
                }
            }
            syn::Item::Mod(inline) => {
                if let Some((_, nested)) = &inline.content {
                    let nested_module = if module.is_empty() {
                        inline.ident.to_string()
                    } else {
                        format!("{module}::{}", inline.ident)
                    };
                    collect_functions(nested, &nested_module, file, include_private, owner, out);
                }
            }
            _ => {}
        }
    }
}

fn discovered(
    sig: &syn::Signature,
    attrs: &[syn::Attribute],
    module: &str,
    file: &Path,
    owner: Option<&str>,
    is_public: bool,
) -> DiscoveredFunction {
    let name = sig.ident.to_string();
    let qualname = match owner {
        Some(owner) => format!("{owner}::{name}"),
        None => name.clone(),
    };
    let full_name = if module.is_empty() {
        qualname.clone()
    } else {
        format!("{module}::{qualname}")
    };
    let doc = extract_docs(attrs);
    let docstring = doc
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string());

    let rendered = {
        let inputs = sig
            .inputs
            .iter()
            .map(|input| input.to_token_stream().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        match &sig.output {
            syn::ReturnType::Default => format!("fn {name}({inputs})"),
            syn::ReturnType::Type(_, ty) => {
                format!("fn {name}({inputs}) -> {}", type_text(ty))
            }
        }
    };

    DiscoveredFunction {
        name,
        module: module.to_string(),
        full_name,
        signature: rendered,
        docstring,
        file: file.to_path_buf(),
        line: sig.span().start().line as u32,
        is_async: sig.asyncness.is_some(),
        is_public,
    }
}
