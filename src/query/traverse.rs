use std::fmt::Write as _;
use std::time::{Duration, Instant};

use bevy::prelude::Entity;

use super::expr::Expr;
use super::pattern::NameMatcher;
use super::resolve::{resolve, PathExpr};
use super::view::SceneView;

pub const DEFAULT_MAX_DEPTH: usize = 32;
pub const DEFAULT_MAX_RESULTS: usize = 200;
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(5);

/// Filters and bounds shared by both query families.
#[derive(Debug, Clone)]
pub struct TraversalOptions {
    pub name: Option<NameMatcher>,
    pub tag: Option<NameMatcher>,
    pub path: Option<String>,
    pub max_depth: usize,
    pub max_results: usize,
    pub budget: Duration,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            name: None,
            tag: None,
            path: None,
            max_depth: DEFAULT_MAX_DEPTH,
            max_results: DEFAULT_MAX_RESULTS,
            budget: DEFAULT_BUDGET,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TraversalStats {
    pub scanned: usize,
    pub matched: usize,
    pub emitted: usize,
    pub vanished: usize,
    pub timed_out: bool,
}

impl TraversalStats {
    pub fn header(&self, label: &str) -> String {
        let mut out = format!(
            "{label}: scanned={} matched={} emitted={}",
            self.scanned, self.matched, self.emitted
        );
        if self.vanished > 0 {
            let _ = write!(out, " vanished={}", self.vanished);
        }
        if self.matched > self.emitted {
            out.push_str(" (truncated)");
        }
        if self.timed_out {
            out.push_str(" [timed out]");
        }
        out
    }
}

/// Result of a traversal: visible rows plus the counters for the header.
#[derive(Debug, Clone)]
pub struct Report {
    pub stats: TraversalStats,
    pub rows: Vec<String>,
}

impl Report {
    pub fn render(&self, label: &str) -> String {
        let mut out = self.stats.header(label);
        for row in &self.rows {
            out.push('\n');
            out.push_str(row);
        }
        if self.rows.is_empty() {
            out.push_str("\n(no matches)");
        }
        out
    }
}

/// Resolves a `/`-separated path filter to the subtrees it names. Each
/// segment is matched against the previous level's children with
/// [`NameMatcher::auto`], so `World/Enemy_*` selects every enemy.
pub fn resolve_path_filter(view: &SceneView<'_>, path: &str) -> Result<Vec<Entity>, String> {
    let segments: Vec<&str> = path
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() {
        return Ok(view.roots().to_vec());
    }
    let mut level: Vec<Entity> = view.roots().to_vec();
    let mut selected = Vec::new();
    for (i, segment) in segments.iter().enumerate() {
        let matcher = NameMatcher::auto(segment)?;
        selected = level
            .iter()
            .copied()
            .filter(|node| view.exists(*node) && matcher.is_match(&view.name(*node)))
            .collect();
        if i + 1 < segments.len() {
            level = selected.iter().flat_map(|node| view.children(*node)).collect();
        }
    }
    Ok(selected)
}

/// Depth-first walk applying filters in order (name, tag, then `extra`)
/// and handing each match that fits the emission window to `emit`.
///
/// Nodes deeper than `max_depth` are never visited; the start nodes are
/// depth 0. `matched` keeps counting after `max_results` rows have been
/// emitted. When the wall-clock budget runs out the walk stops and the
/// stats carry `timed_out`.
pub fn walk<F, E>(
    view: &SceneView<'_>,
    options: &TraversalOptions,
    mut extra: F,
    mut emit: E,
) -> Result<TraversalStats, String>
where
    F: FnMut(&SceneView<'_>, Entity) -> bool,
    E: FnMut(&SceneView<'_>, Entity, usize),
{
    let starts = match &options.path {
        Some(path) if !path.trim().is_empty() => resolve_path_filter(view, path)?,
        _ => view.roots().to_vec(),
    };
    let started = Instant::now();
    let mut stats = TraversalStats::default();
    let mut stack: Vec<(Entity, usize)> = starts.into_iter().rev().map(|e| (e, 0)).collect();

    while let Some((node, depth)) = stack.pop() {
        if started.elapsed() >= options.budget {
            stats.timed_out = true;
            break;
        }
        if !view.exists(node) {
            stats.vanished += 1;
            continue;
        }
        stats.scanned += 1;

        let name_ok = options
            .name
            .as_ref()
            .map_or(true, |m| m.is_match(&view.name(node)));
        let tag_ok = name_ok
            && options
                .tag
                .as_ref()
                .map_or(true, |m| m.is_match(&view.tag(node)));
        if tag_ok && extra(view, node) {
            stats.matched += 1;
            if stats.emitted < options.max_results {
                emit(view, node, depth);
                stats.emitted += 1;
            }
        }

        if depth < options.max_depth {
            for child in view.children(node).into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }
    }
    Ok(stats)
}

pub fn hierarchy(view: &SceneView<'_>, options: &TraversalOptions) -> Result<Report, String> {
    let mut rows = Vec::new();
    let stats = walk(
        view,
        options,
        |_, _| true,
        |view, node, depth| {
            let mut row = format!("{}{} [id={}", "  ".repeat(depth), view.name(node), view.id(node));
            let tag = view.tag(node);
            if tag != crate::components::UNTAGGED {
                let _ = write!(row, " tag={tag}");
            }
            if !view.active(node) {
                row.push_str(" inactive");
            }
            let children = view.children(node).len();
            if children > 0 {
                let _ = write!(row, " children={children}");
            }
            row.push(']');
            rows.push(row);
        },
    )?;
    Ok(Report { stats, rows })
}

pub fn grep(
    view: &SceneView<'_>,
    options: &TraversalOptions,
    select: &[PathExpr],
    condition: Option<&Expr>,
) -> Result<Report, String> {
    let mut rows = Vec::new();
    let stats = walk(
        view,
        options,
        |view, node| condition.map_or(true, |expr| expr.evaluate(view, node)),
        |view, node, _| {
            let mut row = format!("{} (id={})", view.path(node), view.id(node));
            for expr in select {
                let value = resolve(view, node, expr);
                let _ = write!(row, "\n  {} = {}", expr.text, value.render());
            }
            rows.push(row);
        },
    )?;
    Ok(Report { stats, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Health, NodeTag};
    use bevy::prelude::*;

    fn scene(enemies: usize) -> World {
        let mut world = World::new();
        world.init_resource::<AppTypeRegistry>();
        world.resource::<AppTypeRegistry>().write().register::<Health>();
        let root = world.spawn(Name::new("World")).id();
        let group = world.spawn(Name::new("Enemies")).id();
        world.entity_mut(root).add_child(group);
        for i in 0..enemies {
            let enemy = world
                .spawn((
                    Name::new(format!("Enemy_{i}")),
                    NodeTag("Enemy".into()),
                    Health::full(10.0 + i as f32),
                ))
                .id();
            world.entity_mut(group).add_child(enemy);
        }
        let player = world.spawn((Name::new("Player"), NodeTag("Player".into()))).id();
        world.entity_mut(root).add_child(player);
        world
    }

    #[test]
    fn max_results_caps_rows_but_not_matches() {
        let mut world = scene(25);
        let view = SceneView::new(&mut world);
        let options = TraversalOptions {
            tag: Some(NameMatcher::glob("Enemy").unwrap()),
            max_results: 10,
            ..default()
        };
        let report = hierarchy(&view, &options).unwrap();
        assert_eq!(report.rows.len(), 10);
        assert_eq!(report.stats.emitted, 10);
        assert_eq!(report.stats.matched, 25);
        assert!(report.stats.matched >= report.stats.emitted);
        assert!(report.render("hierarchy").starts_with("hierarchy: scanned=28 matched=25 emitted=10 (truncated)"));
    }

    #[test]
    fn depth_bound_and_path_filter() {
        let mut world = scene(3);
        let view = SceneView::new(&mut world);

        let shallow = TraversalOptions {
            max_depth: 1,
            ..default()
        };
        let report = hierarchy(&view, &shallow).unwrap();
        assert_eq!(report.stats.scanned, 3, "World, Enemies, Player");

        let scoped = TraversalOptions {
            path: Some("World/Enemies/Enemy_*".into()),
            ..default()
        };
        let report = hierarchy(&view, &scoped).unwrap();
        assert_eq!(report.stats.matched, 3);
        assert!(report.rows[0].starts_with("Enemy_0"));

        let missing = TraversalOptions {
            path: Some("World/Nowhere".into()),
            ..default()
        };
        assert_eq!(hierarchy(&view, &missing).unwrap().stats.scanned, 0);
    }

    #[test]
    fn grep_projects_selected_fields() {
        let mut world = scene(4);
        let view = SceneView::new(&mut world);
        let condition = Expr::parse("hasComp(Health) and Health.max >= 12").unwrap();
        let select = vec![
            PathExpr::parse("name").unwrap(),
            PathExpr::parse("Health.max").unwrap(),
        ];
        let report = grep(&view, &TraversalOptions::default(), &select, Some(&condition)).unwrap();
        assert_eq!(report.stats.matched, 2);
        assert!(report.rows[0].contains("World/Enemies/Enemy_2"));
        assert!(report.rows[0].contains("name = Enemy_2"));
        assert!(report.rows[0].contains("Health.max = 12.0"));
    }

    #[test]
    fn budget_cuts_a_slow_walk_and_keeps_partial_rows() {
        let mut world = scene(500);
        let view = SceneView::new(&mut world);
        let options = TraversalOptions {
            budget: Duration::from_millis(40),
            ..default()
        };
        let mut rows = Vec::new();
        let started = Instant::now();
        let stats = walk(
            &view,
            &options,
            |_, _| {
                std::thread::sleep(Duration::from_millis(2));
                true
            },
            |view, node, _| rows.push(view.name(node)),
        )
        .unwrap();

        assert!(stats.timed_out);
        assert!(stats.scanned > 0);
        assert!(stats.scanned < 503);
        assert!(!rows.is_empty());
        assert_eq!(rows.len(), stats.emitted);
        assert_eq!(rows[0], "World");
        assert!(stats.header("grep").ends_with("[timed out]"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
