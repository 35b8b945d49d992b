use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use lig_graph::TypeRegistry;
use lig_schema::FieldKind;
use lig_session::{DocumentSource, LoadConfig, LoadSession, Loaded};
use lig_stream::{BlockStream, BlockHeader};
use serde_json::json;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Inspect(args) => cmd_inspect(args, &config, cli.format),
        Command::Schema(args) => cmd_schema(args, &config, cli.format),
        Command::Load(args) => cmd_load(args, config, cli.format),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<LoadConfig> {
    let Some(path) = path else {
        return Ok(LoadConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: LoadConfig =
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn open(path: &Path, config: &LoadConfig) -> anyhow::Result<BlockStream> {
    BlockStream::from_path(path, config.read_options()?)
        .with_context(|| format!("opening {}", path.display()))
}

fn cmd_inspect(args: InspectArgs, config: &LoadConfig, format: OutputFormat) -> anyhow::Result<()> {
    let mut stream = open(&args.path, config)?;
    let header = stream.header();
    let schema = stream.schema().clone();

    let mut blocks = Vec::new();
    let mut per_code: BTreeMap<String, usize> = BTreeMap::new();
    while let Some(block) = stream.next_block()? {
        let h = block.header;
        *per_code.entry(h.code.to_string()).or_default() += 1;
        if args.limit.is_some_and(|n| blocks.len() >= n) {
            continue;
        }
        let struct_name = match h.struct_index {
            BlockHeader::RAW => "raw".to_string(),
            i => schema
                .struct_at(i as usize)
                .map_or_else(|| format!("#{i}"), |s| s.name.to_string()),
        };
        let peek = block
            .payload
            .bytes()
            .map(|b| hex::encode(&b[..args.peek.min(b.len())]))
            .unwrap_or_default();
        blocks.push((block.start, h, struct_name, peek));
    }

    if format == OutputFormat::Json {
        let list: Vec<_> = blocks
            .iter()
            .map(|(offset, h, s, peek)| {
                json!({
                    "offset": offset,
                    "code": h.code.to_string(),
                    "struct": s,
                    "count": h.count,
                    "len": h.len,
                    "address": format!("{:#x}", h.address),
                    "peek": peek,
                })
            })
            .collect();
        let out = json!({
            "pointer_width": header.pointer.bytes(),
            "endian": format!("{:?}", header.endian),
            "structs": schema.structs().len(),
            "blocks": list,
            "per_code": per_code,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "{} {}  pointer {} bytes, {:?} endian, {} structs",
        "document".bold(),
        args.path.display().to_string().cyan(),
        header.pointer.bytes(),
        header.endian,
        schema.structs().len()
    );
    for (offset, h, s, peek) in &blocks {
        println!(
            "  {:>8}  {:<4}  {:<16} x{:<4} {:>8} B  {}  {}",
            offset,
            h.code.to_string().yellow(),
            s,
            h.count,
            h.len,
            format!("{:#x}", h.address).dimmed(),
            peek
        );
    }
    let total: usize = per_code.values().sum();
    if blocks.len() < total {
        println!("  ... {} more", total - blocks.len());
    }
    for (code, n) in &per_code {
        println!("  {:<4} {}", code.yellow(), n);
    }
    Ok(())
}

fn cmd_schema(args: SchemaArgs, config: &LoadConfig, format: OutputFormat) -> anyhow::Result<()> {
    let stream = open(&args.path, config)?;
    let schema = stream.schema();
    let wanted = |name: &str| args.filter.as_deref().map_or(true, |f| name.contains(f));

    if format == OutputFormat::Json {
        let structs: Vec<_> = schema
            .structs()
            .iter()
            .filter(|s| wanted(&s.name))
            .map(|s| {
                let fields: Vec<_> = s
                    .fields
                    .iter()
                    .map(|f| json!({ "type": &*f.type_name, "decl": &*f.decl, "offset": f.offset, "size": f.size }))
                    .collect();
                json!({ "name": &*s.name, "size": s.size, "fields": fields })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&structs)?);
        return Ok(());
    }

    for (index, s) in schema.structs().iter().enumerate() {
        if !wanted(&s.name) {
            continue;
        }
        println!("{:>4}  {} ({} bytes)", index, s.name.bold(), s.size);
        for f in &s.fields {
            let ty = match f.kind {
                FieldKind::Value => f.type_name.to_string(),
                FieldKind::Pointer | FieldKind::FunctionPointer => f.type_name.to_string().blue().to_string(),
            };
            println!("        {:>5}  {:<12} {}", f.offset, ty, f.decl);
        }
    }
    Ok(())
}

/// A registry that accepts every object type the document itself uses.
fn introspect(path: &Path, config: &LoadConfig) -> anyhow::Result<TypeRegistry> {
    let mut stream = open(path, config)?;
    let schema = stream.schema().clone();
    let mut kinds = BTreeMap::new();
    while let Some(block) = stream.next_block()? {
        let h = block.header;
        let (Some(code), Ok(index)) = (h.code.type_code(), usize::try_from(h.struct_index)) else {
            continue;
        };
        if let Some(desc) = schema.struct_at(index) {
            kinds.entry(code).or_insert_with(|| desc.name.to_string());
        }
    }
    tracing::debug!(kinds = kinds.len(), "introspected object kinds");
    Ok(TypeRegistry::introspect(schema, kinds))
}

fn cmd_load(args: LoadArgs, mut config: LoadConfig, format: OutputFormat) -> anyhow::Result<()> {
    if args.shallow {
        config.expand_libraries = false;
    }
    if args.join {
        config.join_after_link = true;
    }
    let registry = Arc::new(introspect(&args.path, &config)?);
    let loaded = LoadSession::open_document(DocumentSource::path(&args.path), registry, config)?
        .load()
        .with_context(|| format!("loading {}", args.path.display()))?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&load_json(&loaded)?)?);
        return Ok(());
    }

    for db in loaded.forest.databases() {
        println!(
            "{} {} {:?} ({} objects)",
            db.id.to_string().bold(),
            db.path.cyan(),
            db.kind,
            db.len()
        );
        loaded.for_each_object(db.id, |_, object| {
            let status = format!("{:?}", object.status);
            let status = if object.is_placeholder() {
                status.red()
            } else {
                status.green()
            };
            println!(
                "  {}  {:<24} users {:<3} {}",
                object.code.to_string().yellow(),
                object.name,
                object.users,
                status
            );
        });
    }

    let report = &loaded.report;
    if report.is_clean() {
        println!("{} no problems", "✓".green().bold());
    }
    for entry in &report.entries {
        println!("{} {:?}", "!".yellow().bold(), entry);
    }
    let s = &report.stats;
    println!(
        "  objects {}, structs decoded {}, reconstructed {}, documents {}, placeholders resolved {}, weak links dropped {}",
        s.objects_read,
        s.decoded_structs,
        s.reconstructed,
        s.documents_opened,
        s.placeholders_resolved,
        report.weak_links_dropped
    );
    Ok(())
}

fn load_json(loaded: &Loaded) -> anyhow::Result<serde_json::Value> {
    let mut databases = Vec::new();
    for db in loaded.forest.databases() {
        let mut objects = Vec::new();
        loaded.for_each_object(db.id, |handle, object| {
            objects.push(json!({
                "handle": handle.to_string(),
                "code": object.code.to_string(),
                "name": object.name,
                "origin": object.origin,
                "users": object.users,
                "status": object.status,
                "weak": object.weak,
            }));
        });
        databases.push(json!({
            "id": db.id,
            "kind": db.kind,
            "path": db.path,
            "resolved": db.resolved,
            "objects": objects,
        }));
    }
    Ok(json!({
        "databases": databases,
        "report": serde_json::to_value(&loaded.report)?,
    }))
}
