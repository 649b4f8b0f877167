//! Static HTML report of what went into a bundle and how big it is.

use std::fmt::Write;
use std::fs;

use camino::Utf8Path;

use crate::bundler::{Artifact, BuildStatus};
use crate::path::relative_to;

/// Renders the report for a finished build.
///
/// Module paths are shown relative to `base` unless `full_paths` is set.
/// Inputs are listed largest first with their share of the total input size.
pub fn render_report(name: &str, status: &BuildStatus, base: &Utf8Path, full_paths: bool) -> String {
    let mut html = String::with_capacity(2048 + status.inputs.len() * 128);

    _ = write_html(&mut html, name, status, base, full_paths);

    html
}

/// Renders the report and writes it to `path`, creating parent directories.
pub fn write_report(
    path: &Utf8Path,
    name: &str,
    status: &BuildStatus,
    base: &Utf8Path,
    full_paths: bool,
) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    fs::write(path, render_report(name, status, base, full_paths))
}

fn write_html(
    html: &mut String,
    name: &str,
    status: &BuildStatus,
    base: &Utf8Path,
    full_paths: bool,
) -> std::fmt::Result {
    let name = escape(name);

    writeln!(html, "<!DOCTYPE html>")?;
    writeln!(html, "<html lang=\"en\">")?;
    writeln!(html, "<head>")?;
    writeln!(html, "<meta charset=\"utf-8\">")?;
    writeln!(html, "<title>Bundle report: {name}</title>")?;
    writeln!(html, "<style>{STYLE}</style>")?;
    writeln!(html, "</head>")?;
    writeln!(html, "<body>")?;
    writeln!(html, "<h1>{name}</h1>")?;
    writeln!(
        html,
        "<p>{} modules, {} output files, {} built in {}ms</p>",
        status.inputs.len(),
        status.outputs.len(),
        format_bytes(status.total_output_bytes()),
        status.duration.as_millis()
    )?;

    writeln!(html, "<h2>Outputs</h2>")?;
    write_table(html, &sorted(&status.outputs), base, full_paths)?;

    writeln!(html, "<h2>Modules</h2>")?;
    write_table(html, &sorted(&status.inputs), base, full_paths)?;

    if !status.warnings.is_empty() {
        writeln!(html, "<h2>Warnings</h2>")?;
        writeln!(html, "<ul>")?;
        for warning in &status.warnings {
            writeln!(html, "<li><pre>{}</pre></li>", escape(warning))?;
        }
        writeln!(html, "</ul>")?;
    }

    writeln!(html, "</body>")?;
    writeln!(html, "</html>")?;

    Ok(())
}

fn write_table(
    html: &mut String,
    artifacts: &[&Artifact],
    base: &Utf8Path,
    full_paths: bool,
) -> std::fmt::Result {
    let total: u64 = artifacts.iter().map(|a| a.bytes).sum();

    writeln!(html, "<table>")?;
    writeln!(html, "<tr><th>Path</th><th>Size</th><th>Share</th></tr>")?;

    for artifact in artifacts {
        let path = if full_paths {
            artifact.path.clone()
        } else {
            relative_to(&artifact.path, base)
        };

        let share = if total == 0 {
            0.0
        } else {
            artifact.bytes as f64 * 100.0 / total as f64
        };

        writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td><span class=\"bar\" style=\"width:{share:.0}%\"></span>{share:.1}%</td></tr>",
            escape(path.as_str()),
            format_bytes(artifact.bytes),
        )?;
    }

    writeln!(html, "</table>")
}

fn sorted(artifacts: &[Artifact]) -> Vec<&Artifact> {
    let mut sorted: Vec<_> = artifacts.iter().collect();
    sorted.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.path.cmp(&b.path)));
    sorted
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MiB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table{border-collapse:collapse;width:100%;margin-bottom:2em}\
td,th{border-bottom:1px solid #ddd;padding:4px 8px;text-align:left}\
td:nth-child(2){white-space:nowrap}\
.bar{display:inline-block;height:0.8em;background:#4a90d9;margin-right:6px}";

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> BuildStatus {
        BuildStatus {
            inputs: vec![
                Artifact {
                    path: "/work/ui/small.js".into(),
                    bytes: 100,
                },
                Artifact {
                    path: "/work/node_modules/<big>.js".into(),
                    bytes: 300,
                },
            ],
            outputs: vec![Artifact {
                path: "/work/public/a.js".into(),
                bytes: 2048,
            }],
            warnings: vec!["unused import".into()],
            ..BuildStatus::default()
        }
    }

    #[test]
    fn largest_module_first() {
        let html = render_report("ui-entry", &status(), Utf8Path::new("/work"), false);

        let big = html.find("node_modules/&lt;big&gt;.js").unwrap();
        let small = html.find("ui/small.js").unwrap();
        assert!(big < small);
        assert!(html.contains("75.0%"));
        assert!(html.contains("2.0 KiB"));
        assert!(html.contains("<title>Bundle report: ui-entry</title>"));
        assert!(html.contains("unused import"));
    }

    #[test]
    fn full_paths_are_absolute() {
        let html = render_report("x", &status(), Utf8Path::new("/work"), true);
        assert!(html.contains("/work/ui/small.js"));
    }

    #[test]
    fn named_entries_are_escaped() {
        let html = render_report("a&b", &BuildStatus::default(), Utf8Path::new("/"), false);
        assert!(html.contains("<h1>a&amp;b</h1>"));
    }
}
