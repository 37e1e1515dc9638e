use std::io::Write as _;

use anyhow::Context as _;
use serde::Serialize;

use crate::app::service::DocumentService;
use crate::cli::{DocumentArgs, EnhanceArgs, IngestArgs, ShowArgs};

pub async fn ingest(service: &DocumentService, args: IngestArgs) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("read {}", args.file.display()))?;
    let title = args.title.or_else(|| {
        args.file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    });
    let ingested = service.ingest(&bytes, title.as_deref()).await?;
    print_json(&ingested)
}

pub async fn list(service: &DocumentService) -> anyhow::Result<()> {
    let documents = service.list_documents().await;
    let mut out = std::io::stdout().lock();
    for doc in documents {
        let mut versions = vec!["regular"];
        if doc.versions.enhanced.is_some() {
            versions.push("enhanced");
        }
        writeln!(
            out,
            "{}\t{}\t{} pages\t{}",
            doc.document_id,
            doc.metadata.title,
            doc.metadata.page_count,
            versions.join(",")
        )
        .context("write stdout")?;
    }
    Ok(())
}

pub async fn show(service: &DocumentService, args: ShowArgs) -> anyhow::Result<()> {
    let tree = service
        .get_structure(&args.document_id, args.version)
        .await?;
    print_json(&tree)
}

pub async fn status(service: &DocumentService, args: DocumentArgs) -> anyhow::Result<()> {
    let availability = service.is_enhanced_available(&args.document_id).await?;
    print_json(&availability)
}

pub async fn enhance(service: &DocumentService, args: EnhanceArgs) -> anyhow::Result<()> {
    let tree = service
        .request_enhanced(&args.document_id, args.force)
        .await?;
    print_json(&tree)
}

pub async fn delete(service: &DocumentService, args: DocumentArgs) -> anyhow::Result<()> {
    let report = service.delete_document(&args.document_id).await?;
    println!(
        "deleted {} ({} subtrees, {} nodes)",
        args.document_id, report.roots_removed, report.nodes_removed
    );
    Ok(())
}

pub async fn sweep(service: &DocumentService) -> anyhow::Result<()> {
    let report = service.sweep().await?;
    print_json(&report)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}
