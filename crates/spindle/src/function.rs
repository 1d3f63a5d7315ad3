//! Function descriptions, frozen function images, and the definition context.
//!
//! A [`FunctionDescription`] captures one definition: source, lowered IR,
//! signature with evaluated defaults, and the module globals it closes over
//! (by value). Binding a description to a dependency map freezes it into a
//! [`FunctionImage`], the content-hashed unit the drivers execute. Two images
//! with equal hashes are interchangeable at invocation time.

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    blueprint::{self, Blueprint},
    decompose::{Decomposition, decompose},
    error::{Error, Result, RunError},
    eval::{Evaluator, Mode},
    expressions::FunctionDef,
    graph::{CallGraph, CallNode},
    hash::{ContentHash, Hasher},
    parse::parse_function,
    resource::Tracker,
    store::StoreAccessor,
    value::Value,
};

/// A declared parameter with its default, already evaluated to a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigParam {
    pub name: String,
    pub default: Option<Value>,
}

/// An ordered positional-or-keyword parameter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<SigParam>,
}

impl Signature {
    /// Distributes call arguments over the parameter slots. Unknown keywords,
    /// double assignments, and arity overflows are type errors.
    fn fill(&self, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Vec<Option<Value>>, RunError> {
        if args.len() > self.params.len() {
            return Err(RunError::type_error(format!(
                "takes {} positional argument(s) but {} were given",
                self.params.len(),
                args.len()
            )));
        }
        let mut slots: Vec<Option<Value>> = vec![None; self.params.len()];
        for (slot, value) in slots.iter_mut().zip(args) {
            *slot = Some(value);
        }
        for (name, value) in kwargs {
            let Some(position) = self.params.iter().position(|param| param.name == name) else {
                return Err(RunError::type_error(format!("got an unexpected keyword argument '{name}'")));
            };
            if slots[position].replace(value).is_some() {
                return Err(RunError::type_error(format!("got multiple values for argument '{name}'")));
            }
        }
        Ok(slots)
    }

    /// Binds arguments for invocation, applying defaults.
    pub(crate) fn bind(&self, args: &[Value], kwargs: &IndexMap<String, Value>) -> Result<Vec<(String, Value)>, RunError> {
        let kwargs = kwargs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let slots = self.fill(args.to_vec(), kwargs)?;
        self.params
            .iter()
            .zip(slots)
            .map(|(param, slot)| {
                let value = slot
                    .or_else(|| param.default.clone())
                    .ok_or_else(|| RunError::type_error(format!("missing required argument '{}'", param.name)))?;
                Ok((param.name.clone(), value))
            })
            .collect()
    }

    /// Normalizes arguments into call-node form: keywords move into their
    /// declared positional slots where the prefix is contiguous, the rest stay
    /// keywords in declaration order. Defaults are *not* filled in, so a call
    /// site that omits a defaulted argument produces the same node regardless
    /// of the default's value.
    pub(crate) fn normalize(
        &self,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<(Vec<Value>, IndexMap<String, Value>), RunError> {
        let mut slots = self.fill(args, kwargs)?;
        for (param, slot) in self.params.iter().zip(&slots) {
            if slot.is_none() && param.default.is_none() {
                return Err(RunError::type_error(format!("missing required argument '{}'", param.name)));
            }
        }
        let prefix = slots.iter().take_while(|slot| slot.is_some()).count();
        let positional: Vec<Value> = slots[..prefix].iter_mut().map(|slot| slot.take().expect("prefix is filled")).collect();
        let mut keywords = IndexMap::new();
        for (param, slot) in self.params.iter().zip(slots).skip(prefix) {
            if let Some(value) = slot {
                keywords.insert(param.name.clone(), value);
            }
        }
        Ok((positional, keywords))
    }
}

/// The immutable record of one workflow function definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescription {
    pub name: String,
    pub source: String,
    pub signature: Signature,
    pub(crate) def: FunctionDef,
    /// Module globals captured by value at definition time.
    pub globals: IndexMap<String, Value>,
}

/// Parses and describes a definition against a context without freezing it.
pub fn describe(source: &str, ctx: &Context) -> Result<FunctionDescription> {
    let def = parse_function(source)?;
    let free = def.free_names();

    let mut globals = IndexMap::new();
    for name in &free {
        if ctx.functions.contains_key(name) {
            continue;
        }
        if let Some(value) = ctx.globals.get(name) {
            globals.insert(name.clone(), value.clone());
        }
    }

    // Defaults are evaluated once, at definition time, in the enclosing scope.
    let mut tracker = Tracker::new(crate::resource::Limits::default());
    let mut evaluator = Evaluator::new(Mode::Pure, IndexMap::new(), &globals, &mut tracker);
    let mut params = Vec::with_capacity(def.params.len());
    for param in &def.params {
        let default = param.default.as_ref().map(|expr| evaluator.eval(expr)).transpose()?;
        params.push(SigParam {
            name: param.name.clone(),
            default,
        });
    }

    Ok(FunctionDescription {
        name: def.name.clone(),
        source: source.to_owned(),
        signature: Signature { params },
        def,
        globals,
    })
}

/// A frozen, content-hashed execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionImage {
    description: FunctionDescription,
    dependencies: IndexMap<String, FunctionImage>,
    decomposition: Decomposition,
    hash: ContentHash,
}

/// Two images are interchangeable exactly when their hashes match.
impl PartialEq for FunctionImage {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for FunctionImage {}

impl FunctionImage {
    /// Defines a workflow function: parses, decomposes, and freezes it with
    /// dependencies and globals resolved from the context.
    pub fn define(source: &str, ctx: &Context) -> Result<Self> {
        let description = describe(source, ctx)?;
        // Names bound inside the constants block count as references too: an
        // assignment like `f = f()` makes `f` function-local, which would hide
        // it from the free-name set — exactly the shadowing the aliasing
        // check must see to reject it.
        let mut referenced = description.def.free_names();
        for stmt in &description.def.body {
            if let crate::expressions::Stmt::Constants(block) = stmt {
                for inner in block {
                    referenced.extend(crate::expressions::stmt_binds(inner));
                }
            }
        }
        let mut dependencies = IndexMap::new();
        for name in referenced {
            if let Some(image) = ctx.functions.get(&name) {
                dependencies.insert(name, image.clone());
            }
        }
        Self::from_parts(description, dependencies)
    }

    /// Binds an existing description to a (possibly different) dependency map.
    /// This is how a caller pins a dependency to an older version.
    pub fn from_parts(description: FunctionDescription, mut dependencies: IndexMap<String, FunctionImage>) -> Result<Self> {
        let known: IndexSet<String> = dependencies.keys().cloned().collect();
        let mut outer: IndexSet<String> = description.signature.params.iter().map(|p| p.name.clone()).collect();
        outer.extend(description.globals.keys().cloned());

        let decomposition = decompose(&description.def, &known, &outer)?;
        dependencies.retain(|name, _| decomposition.dependencies.contains(name));
        dependencies.sort_keys();

        let hash = image_hash(&description, &dependencies);
        debug!(function = %description.name, hash = %hash, "defined workflow function");
        Ok(Self {
            description,
            dependencies,
            decomposition,
            hash,
        })
    }

    pub fn name(&self) -> &str {
        &self.description.name
    }

    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    pub fn description(&self) -> &FunctionDescription {
        &self.description
    }

    pub fn dependencies(&self) -> &IndexMap<String, FunctionImage> {
        &self.dependencies
    }

    pub fn signature(&self) -> &Signature {
        &self.description.signature
    }

    /// Replaces the version hash. The engine itself never inspects hashes
    /// beyond equality and XOR, so a caller may rescope an image (e.g. to
    /// force a rerun or share results across projects) without changing its
    /// behavior.
    #[must_use]
    pub fn with_hash(mut self, hash: ContentHash) -> Self {
        self.hash = hash;
        self
    }

    /// Builds a blueprint for a call with positional arguments.
    pub fn blueprint(&self, args: Vec<Value>) -> Result<Blueprint> {
        blueprint::build(self, args, Vec::new())
    }

    /// Builds a blueprint for a call with positional and keyword arguments.
    pub fn blueprint_with(&self, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Blueprint> {
        blueprint::build(self, args, kwargs)
    }

    fn dep_signatures(&self) -> IndexMap<&str, &Signature> {
        self.dependencies
            .iter()
            .map(|(name, image)| (name.as_str(), &image.description.signature))
            .collect()
    }

    /// Evaluates the constants block in build mode for one call of this
    /// function, producing the local graph: the nodes the block creates, the
    /// edges between them, and an edge from every local sink to `node`.
    pub(crate) fn build_local_graph(&self, node: &CallNode, tracker: &mut Tracker) -> Result<CallGraph> {
        let params = self.description.signature.bind(&node.args, &node.kwargs)?;
        let mut local = CallGraph::new();
        {
            let mut evaluator = Evaluator::new(
                Mode::Build { graph: &mut local },
                self.dep_signatures(),
                &self.description.globals,
                tracker,
            );
            for (name, value) in params {
                evaluator.bind(&name, value);
            }
            evaluator.run_block(&self.decomposition.constants)?;
        }
        let sinks = local.sinks();
        local.add_node(node.clone());
        for sink in sinks {
            if sink != *node {
                local.add_edge(&sink, node);
            }
        }
        Ok(local)
    }

    /// Computes the result of one call of this function.
    ///
    /// The constants block is re-evaluated symbolically, which reconstructs
    /// exactly the call nodes the graph was built from; every binding is then
    /// resolved through the accessor (load + projection) before the body runs
    /// with dependency names out of scope. This is the load-from-store
    /// rewrite in executable form.
    pub(crate) fn compute(&self, node: &CallNode, accessor: StoreAccessor<'_>, tracker: &mut Tracker) -> Result<Value> {
        let params = self.description.signature.bind(&node.args, &node.kwargs)?;
        let mut scratch = CallGraph::new();
        let env = {
            let mut evaluator = Evaluator::new(
                Mode::Build { graph: &mut scratch },
                self.dep_signatures(),
                &self.description.globals,
                tracker,
            );
            for (name, value) in params {
                evaluator.bind(&name, value);
            }
            evaluator.run_block(&self.decomposition.constants)?;
            evaluator.into_env()
        };

        let mut resolved = AHashMap::with_capacity(env.len());
        for (name, value) in env {
            let value = value.resolve_with(&mut |deferred| {
                let image = self
                    .dependencies
                    .get(&deferred.node.function)
                    .ok_or_else(|| Error::MissingFunction(deferred.node.function.clone()))?;
                let loaded = accessor.load(&deferred.node, image.hash)?;
                Ok::<Value, Error>(deferred.apply_path(loaded)?)
            })?;
            resolved.insert(name, value);
        }

        let mut evaluator = Evaluator::new(Mode::Pure, IndexMap::new(), &self.description.globals, tracker);
        evaluator.set_env(resolved);
        evaluator.run_body(&self.decomposition.body)
    }
}

/// `H(source ‖ closure values ‖ sorted (dependency name, dependency hash))`.
fn image_hash(description: &FunctionDescription, dependencies: &IndexMap<String, FunctionImage>) -> ContentHash {
    let mut hasher = Hasher::new("spindle.image");
    hasher.update_str(&description.source);

    let mut globals: Vec<(&String, &Value)> = description.globals.iter().collect();
    globals.sort_by(|a, b| a.0.cmp(b.0));
    hasher.update_u64(globals.len() as u64);
    for (name, value) in globals {
        hasher.update_str(name);
        value.feed(&mut hasher);
    }

    let mut deps: Vec<(&String, ContentHash)> = dependencies.iter().map(|(n, img)| (n, img.hash)).collect();
    deps.sort_by(|a, b| a.0.cmp(b.0));
    hasher.update_u64(deps.len() as u64);
    for (name, hash) in deps {
        hasher.update_str(name);
        hasher.update(hash.as_bytes());
    }
    hasher.finish()
}

/// The definition-site registry: workflow functions and module globals that
/// definitions may reference. Threaded explicitly; nothing here is global
/// state.
#[derive(Debug, Clone, Default)]
pub struct Context {
    functions: IndexMap<String, FunctionImage>,
    globals: IndexMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a value available for capture by later definitions.
    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Registers an image under its function name; redefinition replaces the
    /// entry without touching images that captured the old version.
    pub fn register(&mut self, image: FunctionImage) {
        self.functions.insert(image.name().to_owned(), image);
    }

    /// Defines and registers a workflow function in one step.
    pub fn define(&mut self, source: &str) -> Result<FunctionImage> {
        let image = FunctionImage::define(source, self)?;
        self.register(image.clone());
        Ok(image)
    }

    pub fn get(&self, name: &str) -> Option<&FunctionImage> {
        self.functions.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(names: &[(&str, Option<Value>)]) -> Signature {
        Signature {
            params: names
                .iter()
                .map(|(name, default)| SigParam {
                    name: (*name).to_owned(),
                    default: default.clone(),
                })
                .collect(),
        }
    }

    #[test]
    fn keywords_normalize_into_positional_order() {
        let signature = sig(&[("a", None), ("b", None)]);
        let (args, kwargs) = signature
            .normalize(vec!["x".into()], vec![("b".to_owned(), "y".into())])
            .unwrap();
        assert_eq!(args, vec![Value::from("x"), Value::from("y")]);
        assert!(kwargs.is_empty());
    }

    #[test]
    fn omitted_defaults_stay_out_of_the_node() {
        let signature = sig(&[("msg", None), ("signed", Some("pytest".into()))]);
        let (args, kwargs) = signature.normalize(vec!["m".into()], Vec::new()).unwrap();
        assert_eq!(args, vec![Value::from("m")]);
        assert!(kwargs.is_empty());
    }

    #[test]
    fn gaps_keep_keywords_keyworded() {
        let signature = sig(&[("a", Some(1.into())), ("b", None)]);
        let (args, kwargs) = signature.normalize(Vec::new(), vec![("b".to_owned(), 2.into())]).unwrap();
        assert!(args.is_empty());
        assert_eq!(kwargs.get("b"), Some(&Value::Int(2)));
    }

    #[test]
    fn binding_applies_defaults() {
        let signature = sig(&[("a", None), ("b", Some(Value::None))]);
        let bound = signature.bind(&[Value::Int(1)], &IndexMap::new()).unwrap();
        assert_eq!(bound, vec![("a".to_owned(), Value::Int(1)), ("b".to_owned(), Value::None)]);
        assert!(signature.bind(&[], &IndexMap::new()).is_err());
    }
}
