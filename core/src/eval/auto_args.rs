use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};

use crate::ast::{Arena, NodeId, parse_into};

/// Arguments passed to a root function with formals, in the style of
/// `--arg name expr` and `--argstr name value`.
#[derive(Debug, Clone, Default)]
pub struct AutoArgs {
    args: Vec<AutoArg>,
}

#[derive(Debug, Clone)]
pub struct AutoArg {
    pub name: Arc<str>,
    pub value: AutoArgValue,
}

#[derive(Debug, Clone)]
pub enum AutoArgValue {
    /// Expression parsed into the evaluated arena, evaluated in the builtin scope.
    Expr(NodeId),
    Str(Arc<str>),
}

impl AutoArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a flat argument list. Expressions are allocated in `arena`, which
    /// must be the arena that is then evaluated.
    pub fn from_args(arena: &mut Arena, args: &[String]) -> Result<Self> {
        let mut out = AutoArgs::new();
        let mut iter = args.iter();
        while let Some(flag) = iter.next() {
            let name = iter
                .next()
                .ok_or_else(|| anyhow!("'{}' expects a name and a value", flag))?;
            let value = iter
                .next()
                .ok_or_else(|| anyhow!("'{} {}' is missing its value", flag, name))?;
            match flag.as_str() {
                "--arg" => {
                    let node = parse_into(arena, value)
                        .with_context(|| format!("invalid expression for argument '{}'", name))?;
                    out.push(name, AutoArgValue::Expr(node));
                }
                "--argstr" => out.push(name, AutoArgValue::Str(Arc::from(value.as_str()))),
                other => bail!("unknown entry point flag '{}', expected --arg or --argstr", other),
            }
        }
        Ok(out)
    }

    fn push(&mut self, name: &str, value: AutoArgValue) {
        // later flags win, like repeated command line options
        self.args.retain(|a| a.name.as_ref() != name);
        self.args.push(AutoArg {
            name: Arc::from(name),
            value,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &AutoArg> {
        self.args.iter()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}
