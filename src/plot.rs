//! SVG diagnostic plots of a history table.
//!
//! `history.svg` has one line panel per row, laid out at most five panels
//! wide. Sampling routines also get scatter grids of every objective against
//! every design variable (`scatter_des.svg`) and every constraint
//! (`scatter_const.svg`).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, RoutineError};
use crate::history::{HistoryRow, HistoryTable};
use crate::registry::Role;

const MAX_COLUMNS: usize = 5;
const PANEL_W: f64 = 240.0;
const PANEL_H: f64 = 180.0;
const MARGIN: f64 = 30.0;

fn color(role: Role) -> &'static str {
    match role {
        Role::Objective => "#d62728",
        Role::Design => "#1f77b4",
        Role::Constraint => "#2ca02c",
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Data range padded so flat series still get a visible box.
fn span(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return None;
    }
    if hi - lo < f64::EPSILON * hi.abs().max(1.0) {
        let pad = 0.5 * lo.abs().max(1.0);
        Some((lo - pad, hi + pad))
    } else {
        Some((lo, hi))
    }
}

/// One plotted panel: a title and (x, y) points.
#[derive(Debug, Clone)]
pub struct Panel {
    pub title: String,
    pub x_label: String,
    pub points: Vec<(f64, f64)>,
    pub role: Role,
    /// Connect points in order instead of drawing markers only
    pub line: bool,
}

impl Panel {
    pub fn history(row: &HistoryRow) -> Self {
        Self {
            title: format!("{} [{}]", row.name, row.role.tag()),
            x_label: "iteration".to_string(),
            points: row
                .values
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.map(|y| (i as f64, y)))
                .collect(),
            role: row.role,
            line: true,
        }
    }

    pub fn scatter(x: &HistoryRow, y: &HistoryRow) -> Self {
        Self {
            title: format!("{} vs {}", y.name, x.name),
            x_label: x.name.clone(),
            points: x
                .values
                .iter()
                .zip(&y.values)
                .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
                .collect(),
            role: x.role,
            line: false,
        }
    }

    pub fn to_svg(&self, x: f64, y: f64, width: f64, height: f64) -> String {
        let plot_w = width - 2.0 * MARGIN;
        let plot_h = height - 2.0 * MARGIN;
        let mut svg = format!(
            "<g transform=\"translate({x}, {y})\">\n\
  <rect x=\"{MARGIN}\" y=\"{MARGIN}\" width=\"{plot_w}\" height=\"{plot_h}\" fill=\"white\" stroke=\"#888\" stroke-width=\"1\"/>\n\
  <text x=\"{}\" y=\"18\" font-size=\"12\" text-anchor=\"middle\">{}</text>\n\
  <text x=\"{}\" y=\"{}\" font-size=\"10\" text-anchor=\"middle\">{}</text>\n",
            width / 2.0,
            escape(&self.title),
            width / 2.0,
            height - 8.0,
            escape(&self.x_label)
        );

        let (Some((x0, x1)), Some((y0, y1))) = (
            span(self.points.iter().map(|p| p.0)),
            span(self.points.iter().map(|p| p.1)),
        ) else {
            svg.push_str("</g>");
            return svg;
        };

        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" font-size=\"9\" text-anchor=\"end\">{:.4}</text>\n\
  <text x=\"{}\" y=\"{}\" font-size=\"9\" text-anchor=\"end\">{:.4}</text>\n",
            MARGIN - 2.0,
            MARGIN + 8.0,
            y1,
            MARGIN - 2.0,
            MARGIN + plot_h,
            y0
        ));

        let project = |(px, py): (f64, f64)| {
            (
                MARGIN + (px - x0) / (x1 - x0) * plot_w,
                MARGIN + plot_h - (py - y0) / (y1 - y0) * plot_h,
            )
        };
        let stroke = color(self.role);

        if self.line && self.points.len() > 1 {
            let mut d = String::new();
            for (i, p) in self.points.iter().enumerate() {
                let (sx, sy) = project(*p);
                d.push_str(&format!("{} {sx:.2} {sy:.2} ", if i == 0 { "M" } else { "L" }));
            }
            svg.push_str(&format!(
                "  <path d=\"{}\" fill=\"none\" stroke=\"{stroke}\" stroke-width=\"1.5\"/>\n",
                d.trim_end()
            ));
        }
        for p in &self.points {
            let (sx, sy) = project(*p);
            svg.push_str(&format!(
                "  <circle cx=\"{sx:.2}\" cy=\"{sy:.2}\" r=\"2.5\" fill=\"{stroke}\"/>\n"
            ));
        }
        svg.push_str("</g>");
        svg
    }
}

/// Panels on a grid at most five wide.
pub fn grid_svg(title: &str, panels: &[Panel]) -> String {
    let cols = panels.len().clamp(1, MAX_COLUMNS);
    let rows = panels.len().div_ceil(cols).max(1);
    let width = cols as f64 * PANEL_W;
    let height = rows as f64 * PANEL_H + 30.0;

    let mut svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" font-family=\"sans-serif\">\n\
<rect width=\"100%\" height=\"100%\" fill=\"#fafafa\"/>\n\
<text x=\"{}\" y=\"20\" font-size=\"14\" font-weight=\"bold\" text-anchor=\"middle\">{}</text>\n",
        width / 2.0,
        escape(title)
    );
    for (i, panel) in panels.iter().enumerate() {
        let x = (i % cols) as f64 * PANEL_W;
        let y = 30.0 + (i / cols) as f64 * PANEL_H;
        svg.push_str(&panel.to_svg(x, y, PANEL_W, PANEL_H));
        svg.push('\n');
    }
    svg.push_str("</svg>\n");
    svg
}

fn write(path: PathBuf, svg: String, written: &mut Vec<PathBuf>) -> Result<()> {
    fs::write(&path, svg).map_err(|e| RoutineError::io(&path, e))?;
    written.push(path);
    Ok(())
}

/// Render the plots of `table` into `dir`; returns the files written.
pub fn write_plots(table: &HistoryTable, dir: &Path, sampling: bool) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| RoutineError::io(dir, e))?;
    let mut written = Vec::new();

    let panels: Vec<Panel> = table.rows.iter().map(Panel::history).collect();
    write(dir.join("history.svg"), grid_svg("Variable history", &panels), &mut written)?;

    if sampling {
        for (role, file, title) in [
            (Role::Design, "scatter_des.svg", "Objectives vs design variables"),
            (Role::Constraint, "scatter_const.svg", "Objectives vs constraints"),
        ] {
            let panels: Vec<Panel> = table
                .with_role(Role::Objective)
                .flat_map(|obj| table.with_role(role).map(move |x| Panel::scatter(x, obj)))
                .collect();
            if !panels.is_empty() {
                write(dir.join(file), grid_svg(title, &panels), &mut written)?;
            }
        }
    }

    info!(plots = written.len(), dir = %dir.display(), "plots written");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, role: Role, values: &[Option<f64>]) -> HistoryRow {
        HistoryRow {
            name: name.to_string(),
            role,
            values: values.to_vec(),
        }
    }

    fn table(rows: usize) -> HistoryTable {
        let mut t = HistoryTable::default();
        t.rows.push(row("-cl/cd", Role::Objective, &[Some(-17.0), Some(-18.0), Some(-18.5)]));
        for i in 1..rows {
            t.rows.push(row(&format!("x{i}"), Role::Design, &[Some(1.0), Some(2.0), Some(i as f64)]));
        }
        t
    }

    #[test]
    fn history_panels_wrap_after_five() {
        let t = table(7);
        let panels: Vec<Panel> = t.rows.iter().map(Panel::history).collect();
        let svg = grid_svg("h", &panels);
        assert!(svg.contains(&format!("width=\"{}\"", 5.0 * PANEL_W)));
        assert!(svg.contains(&format!("height=\"{}\"", 2.0 * PANEL_H + 30.0)));
        assert_eq!(svg.matches("<path").count(), 7);
    }

    #[test]
    fn missing_values_are_skipped() {
        let p = Panel::history(&row("oem", Role::Constraint, &[None, Some(3.0), Some(4.0)]));
        assert_eq!(p.points, vec![(1.0, 3.0), (2.0, 4.0)]);
        let empty = Panel::history(&row("oem", Role::Constraint, &[None]));
        assert!(!empty.to_svg(0.0, 0.0, PANEL_W, PANEL_H).contains("<circle"));
    }

    #[test]
    fn flat_series_still_plot() {
        let p = Panel::history(&row("c", Role::Constraint, &[Some(2.0), Some(2.0)]));
        let svg = p.to_svg(0.0, 0.0, PANEL_W, PANEL_H);
        assert_eq!(svg.matches("<circle").count(), 2);
        assert!(!svg.contains("NaN"));
    }

    #[test]
    fn sampling_routines_get_scatter_plots() {
        let tmp = tempfile::tempdir().unwrap();
        let optim = write_plots(&table(3), tmp.path(), false).unwrap();
        assert_eq!(optim, vec![tmp.path().join("history.svg")]);

        let doe = write_plots(&table(3), tmp.path(), true).unwrap();
        assert_eq!(doe.len(), 2);
        let scatter = fs::read_to_string(tmp.path().join("scatter_des.svg")).unwrap();
        assert!(scatter.contains("-cl/cd vs x1"));
        assert!(scatter.contains("-cl/cd vs x2"));
        assert!(!tmp.path().join("scatter_const.svg").exists());
    }

    #[test]
    fn titles_are_escaped() {
        assert_eq!(escape("a<b&c>"), "a&lt;b&amp;c&gt;");
    }
}
