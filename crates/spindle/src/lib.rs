#![doc = include_str!("../../../README.md")]

mod blueprint;
mod builtins;
mod decompose;
mod driver;
mod error;
mod eval;
mod expressions;
mod function;
mod graph;
mod hash;
mod parse;
mod resource;
mod store;
mod typing;
mod value;

pub use crate::{
    blueprint::Blueprint,
    builtins::Builtin,
    driver::{CancelToken, Driver, Queued, Sequential},
    error::{Error, Result, RunError, RunErrorKind},
    function::{Context, FunctionDescription, FunctionImage, SigParam, Signature, describe},
    graph::{CallGraph, CallNode, Deferred, PathStep},
    hash::{ContentHash, HASH_LEN},
    resource::Limits,
    store::{DiskStore, MemoryStore, Store, StoreAccessor},
    value::Value,
};
