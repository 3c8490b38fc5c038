//! Endpoint handlers. Each one validates its parameters off the host
//! thread and returns the closure the scheduler will run there.

use std::fmt::Write as _;

use bevy::prelude::*;

use super::aggregator::BuildStatus;
use super::capture;
use super::scheduler::{Access, HostOp, HostScheduler};
use super::types::{OperationResult, Params};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::query::{self, Expr, NameMatcher, PathExpr, TraversalOptions, DEFAULT_MAX_DEPTH, DEFAULT_MAX_RESULTS};
use crate::scripting::{self, RunOptions, ScriptLimits};

/// A validated request, ready to run on the host thread.
pub struct Prepared {
    pub access: Access,
    pub op: HostOp,
}

impl Prepared {
    fn read(op: impl FnOnce(&mut World) -> OperationResult + Send + 'static) -> Self {
        Self {
            access: Access::Read,
            op: Box::new(op),
        }
    }
}

pub type Handler = fn(&Params, &BridgeConfig) -> BridgeResult<Prepared>;

pub const ENDPOINTS: &[(&str, Handler)] = &[
    ("capture_frame", capture_frame),
    ("capture_from_pose", capture_from_pose),
    ("run_code", run_code),
    ("list_hierarchy", list_hierarchy),
    ("query_graph", query_graph),
    ("status", status),
];

pub fn lookup(endpoint: &str) -> BridgeResult<Handler> {
    if endpoint.is_empty() {
        return Err(BridgeError::EndpointNotFound("(none given)".to_string()));
    }
    ENDPOINTS
        .iter()
        .find(|(name, _)| *name == endpoint)
        .map(|(_, handler)| *handler)
        .ok_or_else(|| BridgeError::EndpointNotFound(endpoint.to_string()))
}

fn capture_frame(params: &Params, _config: &BridgeConfig) -> BridgeResult<Prepared> {
    let request = capture::FrameRequest::from_params(params)?;
    Ok(Prepared::read(move |world| capture::capture_frame(world, &request)))
}

fn capture_from_pose(params: &Params, _config: &BridgeConfig) -> BridgeResult<Prepared> {
    let request = capture::PoseRequest::from_params(params)?;
    Ok(Prepared::read(move |world| capture::capture_from_pose(world, &request)))
}

fn run_code(params: &Params, config: &BridgeConfig) -> BridgeResult<Prepared> {
    let code = params.require_str("code")?;
    let options = RunOptions {
        safe_mode: params.bool_or("safe_mode", true),
        validate_only: params.bool_or("validate_only", false),
    };
    let limits = ScriptLimits::from_config(config);
    let access = if options.validate_only {
        Access::Read
    } else {
        Access::Mutate
    };
    Ok(Prepared {
        access,
        op: Box::new(move |world| scripting::execute(world, &code, options, &limits).into()),
    })
}

fn matcher(params: &Params, key: &str, build: fn(&str) -> Result<NameMatcher, String>) -> BridgeResult<Option<NameMatcher>> {
    match params.opt_str(key).filter(|s| !s.trim().is_empty()) {
        Some(text) => build(text.trim()).map(Some).map_err(|e| BridgeError::param(key, e)),
        None => Ok(None),
    }
}

fn traversal_options(params: &Params, config: &BridgeConfig) -> BridgeResult<TraversalOptions> {
    let glob = matcher(params, "name_glob", NameMatcher::glob)?;
    let regex = matcher(params, "name_regex", NameMatcher::regex)?;
    if glob.is_some() && regex.is_some() {
        return Err(BridgeError::param("name_regex", "cannot be combined with name_glob"));
    }
    Ok(TraversalOptions {
        name: regex.or(glob),
        tag: matcher(params, "tag_glob", NameMatcher::glob)?,
        path: params.opt_str("path").filter(|p| !p.trim().is_empty()),
        max_depth: params.usize_or("max_depth", DEFAULT_MAX_DEPTH),
        max_results: params.usize_or("max_results", DEFAULT_MAX_RESULTS),
        budget: config.query_budget(),
    })
}

fn list_hierarchy(params: &Params, config: &BridgeConfig) -> BridgeResult<Prepared> {
    let options = traversal_options(params, config)?;
    Ok(Prepared::read(move |world| match query::run_hierarchy(world, &options) {
        Ok(text) => OperationResult::text(text),
        Err(e) => BridgeError::param("path", e).into(),
    }))
}

fn query_graph(params: &Params, config: &BridgeConfig) -> BridgeResult<Prepared> {
    let options = traversal_options(params, config)?;
    let select = params
        .str_list("select")
        .iter()
        .map(|text| PathExpr::parse(text))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BridgeError::param("select", e))?;
    let condition = match params.opt_str("where").filter(|w| !w.trim().is_empty()) {
        Some(text) => Some(Expr::parse(&text).map_err(|e| BridgeError::param("where", e))?),
        None => None,
    };
    Ok(Prepared::read(move |world| {
        match query::run_grep(world, &options, &select, condition.as_ref()) {
            Ok(text) => OperationResult::text(text),
            Err(e) => BridgeError::param("path", e).into(),
        }
    }))
}

fn status(_params: &Params, config: &BridgeConfig) -> BridgeResult<Prepared> {
    let addr = format!("{}:{}", config.bind, config.port);
    Ok(Prepared::read(move |world| {
        let frame = world
            .get_resource::<bevy::core::FrameCount>()
            .map_or(0, |f| f.0);
        let nodes = world.query_filtered::<(), With<Name>>().iter(world).count();
        let pending = world.get_resource::<HostScheduler>().map_or(0, HostScheduler::pending);
        let build = world
            .get_resource::<BuildStatus>()
            .map(BuildStatus::errors)
            .unwrap_or_default();

        let mut out = format!("scenelink listening on {addr}\nframe={frame} nodes={nodes} pending={pending}");
        let names: Vec<&str> = ENDPOINTS.iter().map(|(name, _)| *name).collect();
        let _ = write!(out, "\nendpoints: {}", names.join(", "));
        if build.is_empty() {
            out.push_str("\nbuild: ok");
        } else {
            let _ = write!(out, "\nbuild: {} failing file(s)", build.len());
            for (file, error) in build {
                let _ = write!(out, "\n  {file}: {error}");
            }
        }
        OperationResult::text(out)
    }))
}
