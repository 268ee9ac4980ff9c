use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::Deserialize;
use swc_core::{
    common::{SyntaxContext, DUMMY_SP},
    ecma::{
        ast::{Id, ImportPhase, *},
        utils::ExprFactory,
        visit::{visit_mut_pass, Visit, VisitMut, VisitMutWith, VisitWith},
    },
    plugin::{plugin_transform, proxies::TransformPluginProgramMetadata},
};
use tracing::{debug, trace, warn};

// -----------------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------------

/// Plugin options, read from the JSON the host passes alongside the plugin.
/// Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Module specifiers whose hook imports are tracked.
    pub origins: Vec<String>,
    /// Name of the labelling helper.
    pub wrapper_name: String,
    /// Module the helper is imported from.
    pub wrapper_source: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origins: vec![
                "preact/hooks".to_string(),
                "preact/compat".to_string(),
                "react".to_string(),
            ],
            wrapper_name: "addHookName".to_string(),
            wrapper_source: "source/devtools".to_string(),
        }
    }
}

impl Config {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.origins.is_empty() {
            return Err(ConfigError::NoOrigins);
        }
        if self.origins.iter().any(|o| o.is_empty()) {
            return Err(ConfigError::Empty { key: "origins" });
        }
        if self.wrapper_name.is_empty() {
            return Err(ConfigError::Empty { key: "wrapper_name" });
        }
        if self.wrapper_source.is_empty() {
            return Err(ConfigError::Empty { key: "wrapper_source" });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed plugin config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("plugin config lists no hook origins")]
    NoOrigins,

    #[error("plugin config key `{key}` must not be empty")]
    Empty { key: &'static str },
}

// -----------------------------------------------------------------------------
// Tracked hooks
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookName {
    UseState,
    UseReducer,
    UseRef,
    UseMemo,
}

impl HookName {
    pub const ALL: [HookName; 4] = [
        HookName::UseState,
        HookName::UseReducer,
        HookName::UseRef,
        HookName::UseMemo,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "useState" => Some(Self::UseState),
            "useReducer" => Some(Self::UseReducer),
            "useRef" => Some(Self::UseRef),
            "useMemo" => Some(Self::UseMemo),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UseState => "useState",
            Self::UseReducer => "useReducer",
            Self::UseRef => "useRef",
            Self::UseMemo => "useMemo",
        }
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// Import-origin resolution
// -----------------------------------------------------------------------------

/// Answers whether an identifier reference is bound by an import from one of
/// the given module specifiers.
pub trait ImportResolver {
    fn resolves_to_import(&self, ident: &Ident, origins: &[String]) -> bool;
}

/// Import bindings of a single module, keyed by resolved `Id` so that local
/// shadowing never resolves to the import.
#[derive(Debug, Default)]
pub struct ImportBindings {
    sources: HashMap<Id, String>,
}

impl ImportBindings {
    pub fn collect(module: &Module) -> Self {
        let mut bindings = Self::default();
        module.visit_with(&mut ImportCollector { out: &mut bindings.sources });
        bindings
    }

    pub fn source_of(&self, ident: &Ident) -> Option<&str> {
        self.sources.get(&ident.to_id()).map(String::as_str)
    }
}

impl ImportResolver for ImportBindings {
    fn resolves_to_import(&self, ident: &Ident, origins: &[String]) -> bool {
        self.source_of(ident)
            .is_some_and(|source| origins.iter().any(|o| o == source))
    }
}

struct ImportCollector<'a> {
    out: &'a mut HashMap<Id, String>,
}

impl Visit for ImportCollector<'_> {
    fn visit_import_decl(&mut self, n: &ImportDecl) {
        // type-only imports bind nothing callable
        if n.type_only {
            return;
        }
        let source = n.src.value.to_string();
        for s in &n.specifiers {
            let local = match s {
                ImportSpecifier::Named(named) if named.is_type_only => continue,
                ImportSpecifier::Named(named) => &named.local,
                ImportSpecifier::Default(def) => &def.local,
                ImportSpecifier::Namespace(ns) => &ns.local,
            };
            self.out.insert(local.to_id(), source.clone());
        }
    }
}

// -----------------------------------------------------------------------------
// Binding contexts
// -----------------------------------------------------------------------------

/// The binding form that receives a hook call's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingContext {
    /// `const [a, b] = hook()`
    Tuple(Vec<String>),
    /// `const { a, b } = hook()`
    Structured(Vec<String>),
    /// `const a = hook()`
    Simple(String),
    /// Result is discarded or lands somewhere that is not a binding.
    Unbound,
}

impl BindingContext {
    pub fn from_pat(pat: &Pat) -> Self {
        match pat {
            Pat::Ident(b) => Self::Simple(b.id.sym.to_string()),
            Pat::Array(_) => Self::Tuple(binding_names(PatNode::Pat(pat))),
            Pat::Object(_) => Self::Structured(binding_names(PatNode::Pat(pat))),
            Pat::Assign(a) => Self::from_pat(&a.left),
            _ => Self::Unbound,
        }
    }

    pub fn from_assign_target(target: &AssignTarget) -> Self {
        let simple = |target: &SimpleAssignTarget| -> Option<Ident> {
            match target {
                SimpleAssignTarget::Ident(b) => Some(b.id.clone()),
                SimpleAssignTarget::Paren(p) => assigned_ident(&p.expr).cloned(),
                SimpleAssignTarget::TsAs(t) => assigned_ident(&t.expr).cloned(),
                SimpleAssignTarget::TsSatisfies(t) => assigned_ident(&t.expr).cloned(),
                SimpleAssignTarget::TsNonNull(t) => assigned_ident(&t.expr).cloned(),
                SimpleAssignTarget::TsTypeAssertion(t) => assigned_ident(&t.expr).cloned(),
                _ => None,
            }
        };
        match target {
            AssignTarget::Simple(s) => simple(s)
                .map(|id| Self::Simple(id.sym.to_string()))
                .unwrap_or(Self::Unbound),
            AssignTarget::Pat(AssignTargetPat::Array(a)) => Self::Tuple(binding_names(PatNode::Array(a))),
            AssignTarget::Pat(AssignTargetPat::Object(o)) => {
                Self::Structured(binding_names(PatNode::Object(o)))
            }
            _ => Self::Unbound,
        }
    }

    /// Left side of `for (<head> of hook())` / `for (<head> in hook())`.
    pub fn from_for_head(head: &ForHead) -> Self {
        match head {
            ForHead::VarDecl(v) => v
                .decls
                .first()
                .map(|d| Self::from_pat(&d.name))
                .unwrap_or(Self::Unbound),
            ForHead::UsingDecl(u) => u
                .decls
                .first()
                .map(|d| Self::from_pat(&d.name))
                .unwrap_or(Self::Unbound),
            ForHead::Pat(p) => match &**p {
                Pat::Expr(e) => assigned_ident(e)
                    .map(|id| Self::Simple(id.sym.to_string()))
                    .unwrap_or(Self::Unbound),
                pat => Self::from_pat(pat),
            },
        }
    }

    /// Context of `decls[idx]`. Recovers already-lowered array destructuring:
    ///
    /// ```text
    /// var _s = useState(0), foo = _s[0], setFoo = _s[1];
    /// ```
    ///
    /// yields `Tuple(["foo", "setFoo"])` rather than `Simple("_s")`.
    pub fn from_declarator(decls: &[VarDeclarator], idx: usize) -> Self {
        let Some(decl) = decls.get(idx) else {
            return Self::Unbound;
        };
        if let Pat::Ident(tmp) = &decl.name {
            let lowered = lowered_tuple_names(&tmp.id, &decls[idx + 1..]);
            if !lowered.is_empty() {
                return Self::Tuple(lowered);
            }
        }
        Self::from_pat(&decl.name)
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Tuple(names) | Self::Structured(names) => names.first().map(String::as_str),
            Self::Simple(name) => Some(name),
            Self::Unbound => None,
        }
    }
}

// A node on the way down to the bound identifiers of a pattern.
#[derive(Clone, Copy)]
enum PatNode<'a> {
    Pat(&'a Pat),
    Array(&'a ArrayPat),
    Object(&'a ObjectPat),
    Prop(&'a ObjectPatProp),
    Default(&'a BindingIdent),
    Name(&'a BindingIdent),
}

// Level by level, left to right: `[{ a }, b]` yields `b` before `a`.
fn binding_names(root: PatNode<'_>) -> Vec<String> {
    let mut out = vec![];
    let mut queue = VecDeque::from([root]);
    while let Some(node) = queue.pop_front() {
        match node {
            PatNode::Pat(Pat::Ident(b)) | PatNode::Name(b) => out.push(b.id.sym.to_string()),
            PatNode::Pat(Pat::Array(a)) | PatNode::Array(a) => {
                queue.extend(a.elems.iter().flatten().map(PatNode::Pat));
            }
            PatNode::Pat(Pat::Object(o)) | PatNode::Object(o) => {
                queue.extend(o.props.iter().map(PatNode::Prop));
            }
            PatNode::Pat(Pat::Rest(r)) => queue.push_back(PatNode::Pat(&r.arg)),
            PatNode::Pat(Pat::Assign(a)) => queue.push_back(PatNode::Pat(&a.left)),
            // member targets in assignment patterns bind nothing
            PatNode::Pat(_) => {}
            PatNode::Prop(ObjectPatProp::KeyValue(kv)) => queue.push_back(PatNode::Pat(&kv.value)),
            PatNode::Prop(ObjectPatProp::Assign(a)) if a.value.is_some() => {
                queue.push_back(PatNode::Default(&a.key));
            }
            PatNode::Prop(ObjectPatProp::Assign(a)) => queue.push_back(PatNode::Name(&a.key)),
            PatNode::Prop(ObjectPatProp::Rest(r)) => queue.push_back(PatNode::Pat(&r.arg)),
            PatNode::Default(b) => queue.push_back(PatNode::Name(b)),
        }
    }
    out
}

// `x`, `(x)`, `x as T`, `x!`, ... all assign to `x`.
fn assigned_ident(expr: &Expr) -> Option<&Ident> {
    match expr {
        Expr::Ident(i) => Some(i),
        Expr::Paren(p) => assigned_ident(&p.expr),
        Expr::TsAs(t) => assigned_ident(&t.expr),
        Expr::TsSatisfies(t) => assigned_ident(&t.expr),
        Expr::TsNonNull(t) => assigned_ident(&t.expr),
        Expr::TsTypeAssertion(t) => assigned_ident(&t.expr),
        _ => None,
    }
}

// Sibling declarators of the form `name = tmp[<number>]`, in order.
fn lowered_tuple_names(tmp: &Ident, rest: &[VarDeclarator]) -> Vec<String> {
    let tmp = tmp.to_id();
    rest.iter()
        .filter_map(|d| {
            let Pat::Ident(target) = &d.name else { return None };
            let Expr::Member(m) = d.init.as_deref()? else { return None };
            let Expr::Ident(obj) = &*m.obj else { return None };
            let MemberProp::Computed(prop) = &m.prop else { return None };
            let indexed = matches!(&*prop.expr, Expr::Lit(Lit::Num(_)));
            (indexed && obj.to_id() == tmp).then(|| target.id.sym.to_string())
        })
        .collect()
}

// -----------------------------------------------------------------------------
// Rewrite pass
// -----------------------------------------------------------------------------

/// Outcome of rewriting one module.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FileRewriteState {
    pub rewrites: usize,
}

impl FileRewriteState {
    pub fn is_dirty(&self) -> bool {
        self.rewrites > 0
    }
}

/// Wraps every bound, tracked hook call in the configured helper.
pub struct HookCallRewriter<'a, R: ImportResolver> {
    config: &'a Config,
    resolver: &'a R,
    state: FileRewriteState,
}

impl<'a, R: ImportResolver> HookCallRewriter<'a, R> {
    pub fn new(config: &'a Config, resolver: &'a R) -> Self {
        Self {
            config,
            resolver,
            state: FileRewriteState::default(),
        }
    }

    pub fn finish(self) -> FileRewriteState {
        self.state
    }

    fn match_hook(&self, expr: &Expr) -> Option<HookName> {
        let Expr::Call(call) = unparen(expr) else { return None };
        let Callee::Expr(callee) = &call.callee else { return None };
        let Expr::Ident(ident) = &**callee else { return None };
        let hook = HookName::from_name(ident.sym.as_ref())?;
        self.resolver
            .resolves_to_import(ident, &self.config.origins)
            .then_some(hook)
    }

    fn rewrite(&mut self, expr: &mut Expr, hook: HookName, context: &BindingContext) {
        let Some(label) = context.label() else {
            trace!(%hook, "hook result is not bound; leaving call as is");
            return;
        };
        debug!(%hook, label, "labelling hook call");
        self.wrap_call(expr, label.to_string());
    }

    // addHookName(<call>, "<label>")
    fn wrap_call(&mut self, expr: &mut Expr, label: String) {
        let target = unparen_mut(expr);
        let call = std::mem::replace(target, Expr::Invalid(Invalid { span: DUMMY_SP }));
        *target = Expr::Call(CallExpr {
            span: DUMMY_SP,
            callee: Callee::Expr(Box::new(Expr::Ident(Ident::new(
                self.config.wrapper_name.clone().into(),
                DUMMY_SP,
                SyntaxContext::empty(),
            )))),
            args: vec![
                call.as_arg(),
                Expr::Lit(Lit::Str(Str {
                    span: DUMMY_SP,
                    value: label.into(),
                    raw: None,
                }))
                .as_arg(),
            ],
            type_args: None,
            ctxt: SyntaxContext::empty(),
        });
        self.state.rewrites += 1;
    }
}

impl<R: ImportResolver> VisitMut for HookCallRewriter<'_, R> {
    // Declarators are handled here rather than one by one so that lowered
    // destructuring can see its sibling declarators.
    fn visit_mut_var_decl(&mut self, n: &mut VarDecl) {
        for idx in 0..n.decls.len() {
            let Some(hook) = n.decls[idx].init.as_deref().and_then(|e| self.match_hook(e)) else {
                continue;
            };
            let context = BindingContext::from_declarator(&n.decls, idx);
            if let Some(init) = n.decls[idx].init.as_deref_mut() {
                self.rewrite(init, hook, &context);
            }
        }
        n.visit_mut_children_with(self);
    }

    // Any operator: `node ||= useRef(null)` still lands in `node`.
    fn visit_mut_assign_expr(&mut self, n: &mut AssignExpr) {
        if let Some(hook) = self.match_hook(&n.right) {
            let context = BindingContext::from_assign_target(&n.left);
            self.rewrite(&mut n.right, hook, &context);
        }
        n.visit_mut_children_with(self);
    }

    fn visit_mut_for_of_stmt(&mut self, n: &mut ForOfStmt) {
        if let Some(hook) = self.match_hook(&n.right) {
            let context = BindingContext::from_for_head(&n.left);
            self.rewrite(&mut n.right, hook, &context);
        }
        n.visit_mut_children_with(self);
    }

    fn visit_mut_for_in_stmt(&mut self, n: &mut ForInStmt) {
        if let Some(hook) = self.match_hook(&n.right) {
            let context = BindingContext::from_for_head(&n.left);
            self.rewrite(&mut n.right, hook, &context);
        }
        n.visit_mut_children_with(self);
    }

    // [a = useRef()] / (a = useRef()) => ...
    fn visit_mut_assign_pat(&mut self, n: &mut AssignPat) {
        if let Some(hook) = self.match_hook(&n.right) {
            let context = BindingContext::from_pat(&n.left);
            self.rewrite(&mut n.right, hook, &context);
        }
        n.visit_mut_children_with(self);
    }

    // { a = useRef() }
    fn visit_mut_assign_pat_prop(&mut self, n: &mut AssignPatProp) {
        let hook = n.value.as_deref().and_then(|e| self.match_hook(e));
        if let (Some(hook), Some(value)) = (hook, n.value.as_deref_mut()) {
            let context = BindingContext::Simple(n.key.id.sym.to_string());
            self.rewrite(value, hook, &context);
        }
        n.visit_mut_children_with(self);
    }
}

fn unparen(expr: &Expr) -> &Expr {
    match expr {
        Expr::Paren(p) => unparen(&p.expr),
        other => other,
    }
}

fn unparen_mut(expr: &mut Expr) -> &mut Expr {
    match expr {
        Expr::Paren(p) => unparen_mut(&mut p.expr),
        other => other,
    }
}

pub fn rewrite_hook_calls<R: ImportResolver>(
    module: &mut Module,
    config: &Config,
    resolver: &R,
) -> FileRewriteState {
    let mut rewriter = HookCallRewriter::new(config, resolver);
    module.visit_mut_with(&mut rewriter);
    rewriter.finish()
}

// -----------------------------------------------------------------------------
// Helper import
// -----------------------------------------------------------------------------

/// Prepends `import { addHookName } from "<source>";` when anything was
/// rewritten. Returns whether the module changed.
pub fn inject_wrapper_import(module: &mut Module, config: &Config, state: FileRewriteState) -> bool {
    if !state.is_dirty() {
        return false;
    }
    let import_decl = ModuleItem::ModuleDecl(ModuleDecl::Import(ImportDecl {
        span: DUMMY_SP,
        specifiers: vec![ImportSpecifier::Named(ImportNamedSpecifier {
            span: DUMMY_SP,
            local: Ident::new(config.wrapper_name.clone().into(), DUMMY_SP, SyntaxContext::empty()),
            imported: None,
            is_type_only: false,
        })],
        src: Box::new(Str {
            span: DUMMY_SP,
            value: config.wrapper_source.clone().into(),
            raw: None,
        }),
        type_only: false,
        with: None,
        phase: ImportPhase::Evaluation,
    }));
    module.body.insert(0, import_decl);
    debug!(
        rewrites = state.rewrites,
        source = %config.wrapper_source,
        "injected hook label helper import"
    );
    true
}

// -----------------------------------------------------------------------------
// Transform
// -----------------------------------------------------------------------------

pub struct HookNamesTransform {
    config: Config,
}

impl HookNamesTransform {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl VisitMut for HookNamesTransform {
    fn visit_mut_module(&mut self, m: &mut Module) {
        let imports = ImportBindings::collect(m);
        let state = rewrite_hook_calls(m, &self.config, &imports);
        inject_wrapper_import(m, &self.config, state);
    }

    // Scripts cannot import hooks.
    fn visit_mut_script(&mut self, _: &mut Script) {}
}

pub fn hook_names(config: Config) -> impl Pass {
    visit_mut_pass(HookNamesTransform::new(config))
}

// -----------------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------------

#[plugin_transform]
pub fn process_transform(mut program: Program, metadata: TransformPluginProgramMetadata) -> Program {
    let config = metadata
        .get_transform_plugin_config()
        .map(|raw| {
            Config::from_json(&raw).unwrap_or_else(|err| {
                warn!(%err, "ignoring hook-names plugin config");
                Config::default()
            })
        })
        .unwrap_or_default();

    program.visit_mut_with(&mut HookNamesTransform::new(config));
    program
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
