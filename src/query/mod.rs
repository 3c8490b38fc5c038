//! Scene query engine: hierarchy listing and `grep`-style projection
//! over the live `World`.

mod expr;
mod pattern;
mod resolve;
mod traverse;
mod value;
mod view;

use bevy::prelude::World;

pub use expr::Expr;
pub use pattern::NameMatcher;
pub use resolve::PathExpr;
pub use traverse::{TraversalOptions, TraversalStats, DEFAULT_MAX_DEPTH, DEFAULT_MAX_RESULTS};
pub use view::SceneView;

/// `list_hierarchy`: indented listing of nodes that pass the filters.
pub fn run_hierarchy(world: &mut World, options: &TraversalOptions) -> Result<String, String> {
    let view = SceneView::new(world);
    let report = traverse::hierarchy(&view, options)?;
    Ok(report.render("hierarchy"))
}

/// `query_graph`: nodes matching `condition`, each with its `select`
/// projections rendered as `label = value` lines.
pub fn run_grep(
    world: &mut World,
    options: &TraversalOptions,
    select: &[PathExpr],
    condition: Option<&Expr>,
) -> Result<String, String> {
    let view = SceneView::new(world);
    let report = traverse::grep(&view, options, select, condition)?;
    Ok(report.render("query"))
}
