//! Quote snapshots rendered from a Tera template.
//!
//! The HTML is converted with `wkhtmltopdf` when it is on the `PATH`. Without
//! it, or when the conversion fails, the rendered HTML is kept as the
//! snapshot so a status change still leaves a printable artifact behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use quoteflow_core::config::PdfConfig;
use quoteflow_core::lifecycle::{PdfArtifact, PdfFormat, PdfGenerator};
use quoteflow_core::{Discount, Quote, SideEffectError, Totals};
use rust_decimal::Decimal;
use serde::Serialize;
use tera::{Context, Tera};
use tokio::process::Command;
use tracing::{info, warn};

const TEMPLATE_NAME: &str = "quote.html";
const EMBEDDED_TEMPLATE: &str = include_str!("../../../templates/quotes/quote.html.tera");

/// Register custom Tera filters used by quote templates.
///
/// - `money`: two-decimal rendering of an amount, e.g. `totals.gross | money`
pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter("money", tera_money_filter);
}

/// Amounts arrive as decimal strings from `rust_decimal`'s serde form, so
/// they are parsed back into a `Decimal` instead of going through `f64`.
fn tera_money_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let amount = match value {
        tera::Value::String(raw) => Decimal::from_str(raw)
            .map_err(|error| tera::Error::msg(format!("money filter: `{raw}`: {error}")))?,
        tera::Value::Number(number) => number
            .as_i64()
            .map(Decimal::from)
            .or_else(|| number.as_f64().and_then(|float| Decimal::try_from(float).ok()))
            .unwrap_or_default(),
        tera::Value::Null => Decimal::ZERO,
        other => {
            return Err(tera::Error::msg(format!("money filter expects a number, got {other}")));
        }
    };
    Ok(tera::Value::String(format!("{:.2}", amount.round_dp(2))))
}

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("template error: {0}")]
    Template(String),
    #[error("conversion error: {0}")]
    Conversion(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PdfError> for SideEffectError {
    fn from(error: PdfError) -> Self {
        SideEffectError::Pdf(error.to_string())
    }
}

#[derive(Debug, Serialize)]
struct LineRow<'a> {
    description: &'a str,
    quantity: Decimal,
    unit_price: Decimal,
    tax_rate: Decimal,
    net_amount: Decimal,
}

#[derive(Debug, Serialize)]
struct QuoteDocument<'a> {
    number: &'a str,
    status: &'static str,
    company_id: &'a str,
    client_id: &'a str,
    quote_date: NaiveDate,
    valid_until: NaiveDate,
    lines: Vec<LineRow<'a>>,
    discount_label: Option<String>,
    shipping: Decimal,
    has_shipping: bool,
    totals: Totals,
}

impl<'a> QuoteDocument<'a> {
    fn from_quote(quote: &'a Quote) -> Self {
        let discount_label = match quote.discount {
            Discount::None => None,
            Discount::Percentage(rate) => Some(format!("{}%", rate.normalize())),
            Discount::Fixed(_) => Some("fixed".to_string()),
        };
        Self {
            number: quote.display_number(),
            status: quote.status.label(),
            company_id: &quote.company_id.0,
            client_id: &quote.client_id.0,
            quote_date: quote.quote_date,
            valid_until: quote.valid_until,
            lines: quote
                .lines
                .iter()
                .map(|line| LineRow {
                    description: &line.description,
                    quantity: line.quantity.normalize(),
                    unit_price: line.unit_price,
                    tax_rate: line.tax_rate.normalize(),
                    net_amount: line.net_amount(),
                })
                .collect(),
            discount_label,
            shipping: quote.shipping,
            has_shipping: !quote.shipping.is_zero(),
            totals: quote.totals.for_display(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TeraPdfGenerator {
    tera: Tera,
    output_dir: PathBuf,
    wkhtmltopdf_path: Option<PathBuf>,
}

impl TeraPdfGenerator {
    /// Uses the template named in the config, or the embedded one.
    pub fn from_config(config: &PdfConfig) -> Result<Self, PdfError> {
        let source = match &config.template {
            Some(path) => std::fs::read_to_string(path).map_err(|error| {
                PdfError::Template(format!("cannot read template {}: {error}", path.display()))
            })?,
            None => EMBEDDED_TEMPLATE.to_string(),
        };

        let wkhtmltopdf_path = which::which("wkhtmltopdf").ok();
        match &wkhtmltopdf_path {
            Some(path) => info!(path = %path.display(), "wkhtmltopdf found"),
            None => warn!("wkhtmltopdf not found in PATH - quote snapshots will be stored as HTML"),
        }

        Self::with_template(&source, config.output_dir.clone(), wkhtmltopdf_path)
    }

    fn with_template(
        source: &str,
        output_dir: PathBuf,
        wkhtmltopdf_path: Option<PathBuf>,
    ) -> Result<Self, PdfError> {
        let mut tera = Tera::default();
        register_template_filters(&mut tera);
        tera.add_raw_template(TEMPLATE_NAME, source)
            .map_err(|error| PdfError::Template(error.to_string()))?;
        Ok(Self { tera, output_dir, wkhtmltopdf_path })
    }

    pub fn render_html(&self, quote: &Quote) -> Result<String, PdfError> {
        let context = Context::from_serialize(QuoteDocument::from_quote(quote))
            .map_err(|error| PdfError::Template(error.to_string()))?;
        self.tera
            .render(TEMPLATE_NAME, &context)
            .map_err(|error| PdfError::Template(error.to_string()))
    }

    async fn write_snapshot(&self, quote: &Quote) -> Result<PdfArtifact, PdfError> {
        let html = self.render_html(quote)?;
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let stem = file_stem(quote);

        if let Some(wkhtmltopdf) = &self.wkhtmltopdf_path {
            let pdf_path = self.output_dir.join(format!("{stem}.pdf"));
            match convert_html_to_pdf(&html, wkhtmltopdf, &pdf_path).await {
                Ok(bytes) => {
                    return Ok(PdfArtifact { path: pdf_path, bytes, format: PdfFormat::Pdf });
                }
                Err(error) => warn!(
                    event_name = "dispatch.pdf.conversion_failed",
                    quote_id = %quote.id,
                    error = %error,
                    "PDF conversion failed, falling back to HTML"
                ),
            }
        }

        let html_path = self.output_dir.join(format!("{stem}.html"));
        tokio::fs::write(&html_path, html.as_bytes()).await?;
        Ok(PdfArtifact { path: html_path, bytes: html.len(), format: PdfFormat::Html })
    }
}

#[async_trait]
impl PdfGenerator for TeraPdfGenerator {
    async fn generate_quote_pdf(&self, quote: &Quote) -> Result<PdfArtifact, SideEffectError> {
        Ok(self.write_snapshot(quote).await?)
    }
}

/// Quote numbers are operator-chosen when explicit, so anything outside a
/// conservative character set is replaced before it reaches the filesystem.
fn file_stem(quote: &Quote) -> String {
    quote
        .display_number()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

async fn convert_html_to_pdf(
    html: &str,
    wkhtmltopdf_path: &Path,
    pdf_path: &Path,
) -> Result<usize, PdfError> {
    let html_path = std::env::temp_dir().join(format!("quote_{}.html", uuid::Uuid::new_v4()));
    tokio::fs::write(&html_path, html).await?;

    let output = Command::new(wkhtmltopdf_path)
        .args(["--page-size", "A4"])
        .args(["--margin-top", "10mm", "--margin-bottom", "10mm"])
        .args(["--margin-left", "10mm", "--margin-right", "10mm"])
        .args(["--encoding", "utf-8"])
        .arg(&html_path)
        .arg(pdf_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;
    let _ = tokio::fs::remove_file(&html_path).await;
    let output = output?;

    if !output.status.success() {
        return Err(PdfError::Conversion(String::from_utf8_lossy(&output.stderr).to_string()));
    }

    let metadata = tokio::fs::metadata(pdf_path).await?;
    Ok(metadata.len() as usize)
}
