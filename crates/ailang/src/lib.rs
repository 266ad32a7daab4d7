#![doc = include_str!("../../../README.md")]

mod anf;
pub mod capability;
mod dict;
pub mod diagnostic;
mod effects;
mod elaborate;
mod eval;
mod iface;
mod infer;
pub mod io;
mod lexer;
mod link;
mod loader;
mod parse;
mod pretty;
mod prim;
mod run;
mod source;
pub mod surface;
mod types;
mod value;

pub use crate::{
    capability::{CapabilityError, EffectContext, EffectName},
    diagnostic::{CODE_REGISTRY, CodeInfo, ERROR_SCHEMA, Phase, PhaseResult, Report, Severity, schema_accepts},
    effects::{BuiltinRegistry, BuiltinSpec, EffectError, EffectHost, registry as builtin_registry},
    eval::DEFAULT_MAX_RECURSION_DEPTH,
    iface::{IFACE_SCHEMA, Interface},
    io::{
        CollectStringPrint, FileSystem, HttpClient, InputReader, MockFs, MockHttp, NoHttp, NoPrint, PrintWriter,
        QueueInput, RealFs, StdInput, StdPrint,
    },
    loader::{Module, ModuleLoader},
    parse::{parse_source, parse_text},
    pretty::{print_expr, print_file, print_pattern, print_type},
    run::{PhaseState, RunConfig, RunOutcome, Runner, Termination, TestInfo},
    source::{Pos, Sid, Span, normalize},
    value::Value,
};
