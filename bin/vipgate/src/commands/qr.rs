use std::path::PathBuf;

use vipgate_core::{Config, Paths};
use vipgate_scraper::Scraper;

/// Run the checkout pipeline once and write the QR artifact to a file.
/// Useful for probing a creator page without the gateway running.
pub async fn run(invoice_id: Option<String>, amount: i64, output: Option<PathBuf>) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = Config::load_or_default(&paths)?;

    let invoice_id = invoice_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    println!("Invoice:  {}", invoice_id);
    println!("Amount:   Rp{}", vipgate_scraper::format_rupiah(amount));
    match config.profile_url() {
        Some(url) => println!("Profile:  {}", url),
        None => anyhow::bail!("donation.username is not configured"),
    }
    println!();

    let scraper = Scraper::new(config, paths.clone());
    let (artifact, report) = scraper
        .fetch_payment_qr_with_report(&invoice_id, amount)
        .await?;

    for event in &report.stages {
        let mark = if event.ok { "✅" } else { "❌" };
        println!(
            "  {} {:<13} {:>6}ms  {}",
            mark,
            event.stage.as_str(),
            event.elapsed_ms,
            event.note
        );
    }
    println!();

    let Some(artifact) = artifact else {
        anyhow::bail!("pipeline finished without a QR artifact");
    };

    let ext = if artifact.mime == "image/png" { "png" } else { "bin" };
    let path = output.unwrap_or_else(|| {
        paths.media_dir().join(format!("qr-{}.{}", invoice_id, ext))
    });
    std::fs::write(&path, &artifact.bytes)?;

    println!("Provenance: {}", artifact.provenance.as_str());
    println!("Written:    {} ({} bytes)", path.display(), artifact.bytes.len());
    Ok(())
}
