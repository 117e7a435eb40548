// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// Rendering of diagnostics against source text. The sink itself never
// touches stdout; everything user-visible goes through here.

use ariadne::{ColorGenerator, Config, Label, Report, ReportKind, Source};

use crate::diagnostics::{Diagnostic, Diagnostics, Level};

fn report_kind(level: Level) -> ReportKind<'static> {
    match level {
        Level::Error => ReportKind::Error,
        Level::Warning => ReportKind::Warning,
    }
}

fn build_report<'a>(
    diagnostic: &Diagnostic,
    file_path: &'a str,
    color: bool,
) -> Report<'a, (&'a str, std::ops::Range<usize>)> {
    let mut colors = ColorGenerator::new();
    let offset = diagnostic.loc().map(|l| l.first as usize).unwrap_or(0);
    let mut report = Report::build(report_kind(diagnostic.level), file_path, offset)
        .with_message(&diagnostic.message)
        .with_config(Config::default().with_compact(true).with_color(color));
    for label in &diagnostic.labels {
        let message = if label.message.is_empty() {
            "near this point"
        } else {
            label.message.as_str()
        };
        report = report.with_label(
            Label::new((file_path, label.loc.range()))
                .with_message(message)
                .with_color(colors.next()),
        );
    }
    report.finish()
}

/// Print every diagnostic in the list, with the source ranges resolved
/// against `source`.
pub fn print_diagnostics(diagnostics: &Diagnostics, file_path: &str, source: &str) {
    for diagnostic in diagnostics.iter() {
        build_report(diagnostic, file_path, true)
            .print((file_path, Source::from(source)))
            .unwrap();
    }
}

/// Render every diagnostic into a string, without color. Used by golden
/// tests.
pub fn render_diagnostics(diagnostics: &Diagnostics, file_path: &str, source: &str) -> String {
    let mut out = Vec::new();
    for diagnostic in diagnostics.iter() {
        build_report(diagnostic, file_path, false)
            .write((file_path, Source::from(source)), &mut out)
            .unwrap();
    }
    String::from_utf8(out).unwrap()
}
