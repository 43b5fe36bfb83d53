use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use console::style;
use inquire::Confirm;
use serde_json::Value;
use trackline_backup::{
    catalog, CancelToken, ExportSummary, Exporter, ImportMode, ImportPreview, ImportReport,
    Importer, ProviderSet, SchemaRegistry, Severity, ValidationReport, Validator,
};
use trackline_migrate::{BackupDocument, MigrationEngine};
use trackline_store::{MemoryCollection, SqliteStore};

use crate::config::CliConfig;

fn registry() -> Result<Arc<SchemaRegistry>> {
    Ok(Arc::new(
        catalog::builtin_registry().context("built-in schema catalog is inconsistent")?,
    ))
}

fn open_store(db_path: &Path, config: &CliConfig) -> Result<SqliteStore> {
    SqliteStore::open_with_config(db_path, config.sqlite_config()?)
        .with_context(|| format!("failed to open database {}", db_path.display()))
}

fn sqlite_providers(store: &SqliteStore, registry: &SchemaRegistry) -> ProviderSet {
    ProviderSet::from_fn(registry, |name| store.collection(name))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write_output(output: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.write_all(b"\n")?;
            Ok(())
        }
    }
}

/// `trackline status <db>`: collection counts and database facts.
pub fn status(db_path: &Path, config: &CliConfig) -> Result<()> {
    let store = open_store(db_path, config)?;
    let counts = store.collection_counts()?;
    let size = store.file_size()?;
    let journal = store.journal_mode()?;

    println!(
        "Database: {} (SQLite, {journal} mode)",
        style(db_path.display()).bold()
    );
    println!("Size: {}", format_bytes(size));
    println!("Schema: v{}", catalog::CURRENT_VERSION);
    println!();

    println!("  {:<20} {:>10}", style("Collection").bold(), style("Records").bold());
    println!("  {}", "-".repeat(31));
    let mut total = 0;
    for name in catalog::COLLECTIONS {
        let count = counts
            .iter()
            .find(|(n, _)| n == name)
            .map_or(0, |(_, c)| *c);
        total += count;
        println!("  {name:<20} {:>10}", format_num(count));
    }
    for (name, count) in counts
        .iter()
        .filter(|(n, _)| !catalog::COLLECTIONS.contains(&n.as_str()))
    {
        println!(
            "  {:<20} {:>10}  {}",
            name,
            format_num(*count),
            style("(not in catalog)").dim()
        );
    }
    println!("  {}", "-".repeat(31));
    println!("  {:<20} {:>10}", "Total", format_num(total));
    println!();

    Ok(())
}

/// `trackline export <db> [-o file]`: write a redacted backup document.
pub fn export(db_path: &Path, output: Option<&Path>, compact: bool, config: &CliConfig) -> Result<()> {
    let store = open_store(db_path, config)?;
    let registry = registry()?;
    let providers = sqlite_providers(&store, &registry);
    let mut backup_config = config.backup_config();
    if compact {
        backup_config.pretty = false;
    }
    let pretty = backup_config.pretty;
    let exporter = Exporter::new(registry, providers, backup_config)?;

    let (document, summary) = exporter.build_export_with_summary()?;
    write_output(output, &document.to_vec(pretty)?)?;
    print_export_summary(&summary, output);
    Ok(())
}

fn print_export_summary(summary: &ExportSummary, output: Option<&Path>) {
    let target = output.map_or_else(|| "stdout".to_string(), |p| p.display().to_string());
    eprintln!(
        "{} {} records from {} collections (v{}) to {target}",
        style("Exported").green().bold(),
        format_num(summary.total_records() as u64),
        summary.collections.len(),
        summary.schema_version,
    );
    if summary.redacted_fields > 0 {
        eprintln!(
            "  {} sensitive value(s) replaced with the redaction marker",
            summary.redacted_fields
        );
    }
}

/// `trackline import <db> <file>`: restore a backup document.
pub async fn import(
    db_path: &Path,
    file: &Path,
    mode: Option<ImportMode>,
    dry_run: bool,
    yes: bool,
    config: &CliConfig,
) -> Result<()> {
    let raw = read_file(file)?;
    let store = open_store(db_path, config)?;
    let registry = registry()?;
    let providers = sqlite_providers(&store, &registry);
    let backup_config = config.backup_config();
    let mode = mode.unwrap_or(backup_config.default_mode);
    let importer = Arc::new(Importer::new(registry, providers, backup_config)?);

    if dry_run {
        let preview = importer.preview(&raw)?;
        print_preview(&preview);
        println!("{}", style("Dry run: nothing was written.").dim());
        return Ok(());
    }

    if mode == ImportMode::Replace && !yes {
        let confirmed = Confirm::new(&format!(
            "Replace the collections in {} with the contents of {}?",
            db_path.display(),
            file.display()
        ))
        .with_default(false)
        .with_help_message("Collections missing from the backup are left untouched")
        .prompt()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let cancel = CancelToken::new();
    let mut task = {
        let importer = Arc::clone(&importer);
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || importer.import_with_cancel(&raw, mode, &cancel))
    };

    let report = tokio::select! {
        result = &mut task => result??,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{}", style("Cancelling after the current collection...").yellow());
            cancel.cancel();
            task.await??
        }
    };

    print_report(&report, mode);
    Ok(())
}

fn print_report(report: &ImportReport, mode: ImportMode) {
    println!(
        "Imported v{} document ({mode} mode)",
        report.source_version
    );
    println!();
    println!(
        "  {:<20} {:>10} {:>10} {:>10}",
        style("Collection").bold(),
        style("Attempted").bold(),
        style("Applied").bold(),
        style("Failed").bold()
    );
    println!("  {}", "-".repeat(53));
    for outcome in &report.outcomes {
        let failed = outcome.errors.len() as u64;
        let failed = if failed == 0 {
            style(format_num(failed)).green()
        } else {
            style(format_num(failed)).red()
        };
        println!(
            "  {:<20} {:>10} {:>10} {:>10}",
            outcome.collection,
            format_num(outcome.records_attempted as u64),
            format_num(outcome.records_applied as u64),
            failed,
        );
    }
    println!();

    for outcome in &report.outcomes {
        if let Some(error) = &outcome.write_error {
            println!(
                "{} {}: {error}",
                style("collection failed").red().bold(),
                outcome.collection
            );
        }
        for error in outcome.errors.iter().take(10) {
            println!(
                "  {}/{}: {}",
                outcome.collection,
                truncate(&error.record_id, 24),
                error.reason
            );
        }
        if outcome.errors.len() > 10 {
            println!("  ... and {} more", outcome.errors.len() - 10);
        }
    }
    for warning in &report.warnings {
        println!("{} {warning}", style("warning:").yellow());
    }

    let summary = format!(
        "{} of {} collections restored, {} records skipped",
        report.collections_restored(),
        report.outcomes.len(),
        report.records_failed()
    );
    if report.cancelled {
        println!("{} {summary}", style("Cancelled:").yellow().bold());
    } else if report.is_clean() {
        println!("{} {summary}", style("Done:").green().bold());
    } else {
        println!("{} {summary}", style("Partially applied:").yellow().bold());
    }
}

/// `trackline validate <file>`: report every issue in a backup document.
pub fn validate(file: &Path) -> Result<()> {
    let raw = read_file(file)?;
    let value: Value = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;
    let registry = registry()?;
    let report = Validator::new(&registry).validate(&value);
    print_validation(&report);

    if report.has_fatal() {
        bail!("{} cannot be imported", file.display());
    }
    Ok(())
}

fn print_validation(report: &ValidationReport) {
    if let Some(version) = report.declared_version {
        println!("Declared schema: v{version}");
    }
    if report.is_empty() {
        println!("{}", style("No issues found.").green());
        return;
    }
    for issue in &report.issues {
        let label = match issue.severity {
            Severity::Fatal => style("fatal  ").red().bold(),
            Severity::Record => style("record ").yellow(),
            Severity::Warning => style("warning").dim(),
        };
        println!("  {label} {issue}");
    }
    println!();
    println!(
        "{} fatal, {} record, {} warning",
        report.fatal().count(),
        report.record_issues().count(),
        report.warnings().count()
    );
}

/// `trackline migrate <file> [-o file]`: rewrite a document at the current version.
pub fn migrate(file: &Path, output: Option<&Path>, config: &CliConfig) -> Result<()> {
    let raw = read_file(file)?;
    let value: Value = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;
    let registry = registry()?;

    let report = Validator::new(&registry).validate(&value);
    if !report.is_empty() && report.warnings().count() != report.issues.len() {
        print_validation(&report);
        bail!("fix the issues above before migrating");
    }

    let mut document = BackupDocument::from_value(value)?;
    document
        .collections
        .retain(|name, _| registry.is_known_at(name, document.schema_version));
    let from = document.schema_version;
    let migrated = MigrationEngine::new(&registry).migrate(document)?;

    write_output(output, &migrated.to_vec(config.backup_config().pretty)?)?;
    eprintln!(
        "{} v{from} → v{} ({} records)",
        style("Migrated").green().bold(),
        migrated.schema_version,
        format_num(migrated.record_count() as u64)
    );
    Ok(())
}

/// `trackline preview <file>`: what an import would do.
pub fn preview(file: &Path, config: &CliConfig) -> Result<()> {
    let raw = read_file(file)?;
    let registry = registry()?;
    let providers = ProviderSet::from_fn(&registry, |name| MemoryCollection::new(name));
    let importer = Importer::new(registry, providers, config.backup_config())?;
    print_preview(&importer.preview(&raw)?);
    Ok(())
}

fn print_preview(preview: &ImportPreview) {
    println!(
        "Backup from {} (v{} → v{})",
        preview.exported_at.format("%Y-%m-%d %H:%M UTC"),
        preview.source_version,
        preview.target_version
    );
    println!();
    println!(
        "  {:<20} {:>10} {:>10}",
        style("Collection").bold(),
        style("Records").bold(),
        style("Skipped").bold()
    );
    println!("  {}", "-".repeat(42));
    for (name, count) in &preview.collections {
        let skipped = preview.skipped.get(name).map_or(0, Vec::len);
        println!(
            "  {name:<20} {:>10} {:>10}",
            format_num(*count as u64),
            format_num(skipped as u64)
        );
    }
    println!();
    for (name, errors) in &preview.skipped {
        for error in errors {
            println!("  {name}/{}: {}", truncate(&error.record_id, 24), error.reason);
        }
    }
    for warning in &preview.warnings {
        println!("{} {warning}", style("warning:").yellow());
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn format_num(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
