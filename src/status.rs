use crate::config::{AppConfig, RefreshTarget};
use crate::error::StoreError;
use crate::storage_utils::ResultStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

pub const NOT_AVAILABLE: &str = "not available";

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSummary {
    pub updated: Option<DateTime<Utc>>,
    pub observed: usize,
    pub horizon: usize,
    pub last_close: Option<f64>,
    pub final_trend: Option<f64>,
    pub final_width: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusRow {
    pub target: RefreshTarget,
    pub artifact: Option<ArtifactSummary>,
}

/// Summarises the current artifact of every target. A target that never
/// completed a cycle gets `artifact: None`.
pub async fn collect(store: &ResultStore, targets: &[RefreshTarget]) -> Result<Vec<StatusRow>, StoreError> {
    let mut rows = Vec::with_capacity(targets.len());
    for target in targets {
        let artifact = match store.load(&target.symbol, &target.period).await? {
            Some(result) => Some(ArtifactSummary {
                updated: store.updated_at(&target.symbol, &target.period).await?,
                observed: result.origin.len(),
                horizon: result.trend.len().saturating_sub(result.origin.len()),
                last_close: result.origin.last().copied(),
                final_trend: result.trend.last().copied(),
                final_width: result.trend_upper_width.last().copied(),
            }),
            None => None,
        };
        rows.push(StatusRow {
            target: target.clone(),
            artifact,
        });
    }
    Ok(rows)
}

fn format_price(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v))
}

pub fn render(rows: &[StatusRow]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Symbol").add_attribute(Attribute::Bold),
            Cell::new("Period").add_attribute(Attribute::Bold),
            Cell::new("Updated (UTC)").add_attribute(Attribute::Bold),
            Cell::new("Points").add_attribute(Attribute::Bold),
            Cell::new("Last Close")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new("Final Trend")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new("Band Width")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
        ]);

    for row in rows {
        let symbol_cell = Cell::new(&row.target.symbol).fg(Color::Cyan);
        let period_cell = Cell::new(&row.target.period).fg(Color::DarkGrey);

        match &row.artifact {
            Some(summary) => {
                let updated = summary
                    .updated
                    .map(|dt| dt.format("%d-%m-%Y %H:%M:%S").to_string())
                    .unwrap_or_else(|| "Unknown Time".to_string());
                table.add_row(vec![
                    symbol_cell,
                    period_cell,
                    Cell::new(updated),
                    Cell::new(format!("{}+{}", summary.observed, summary.horizon)),
                    Cell::new(format_price(summary.last_close)).set_alignment(CellAlignment::Right),
                    Cell::new(format_price(summary.final_trend))
                        .fg(Color::Green)
                        .set_alignment(CellAlignment::Right),
                    Cell::new(format_price(summary.final_width)).set_alignment(CellAlignment::Right),
                ]);
            }
            None => {
                table.add_row(vec![
                    symbol_cell,
                    period_cell,
                    Cell::new(NOT_AVAILABLE).fg(Color::Red),
                    Cell::new("-"),
                    Cell::new("-").set_alignment(CellAlignment::Right),
                    Cell::new("-").set_alignment(CellAlignment::Right),
                    Cell::new("-").set_alignment(CellAlignment::Right),
                ]);
            }
        }
    }
    table
}

pub async fn run(config: &AppConfig) -> Result<()> {
    let store = ResultStore::new(&config.data_dir).await?;
    let rows = collect(&store, &config.targets()).await?;

    let available = rows.iter().filter(|r| r.artifact.is_some()).count();
    println!(
        "\n(Forecasts in {}: {} of {} available)\n{}",
        store.base_dir.display(),
        available,
        rows.len(),
        render(&rows)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ForecastResult;

    #[tokio::test]
    async fn test_missing_artifact_is_reported_not_available() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(temp_dir.path()).await.unwrap();
        store
            .publish(
                "btcusdt",
                "1day",
                &ForecastResult {
                    labels: vec!["a".into(), "b".into(), "c".into()],
                    trend: vec![1.0, 2.0, 3.0],
                    trend_upper_width: vec![0.0, 0.0, 0.5],
                    trend_lower: vec![1.0, 2.0, 2.75],
                    origin: vec![1.0, 2.0],
                },
            )
            .await
            .unwrap();

        let targets = vec![
            RefreshTarget::new("btcusdt", "1day", 300),
            RefreshTarget::new("htusdt", "1day", 300),
        ];
        let rows = collect(&store, &targets).await.unwrap();

        let summary = rows[0].artifact.as_ref().unwrap();
        assert_eq!(summary.observed, 2);
        assert_eq!(summary.horizon, 1);
        assert_eq!(summary.last_close, Some(2.0));
        assert_eq!(summary.final_trend, Some(3.0));
        assert_eq!(summary.final_width, Some(0.5));
        assert!(rows[1].artifact.is_none());

        let rendered = render(&rows).to_string();
        assert!(rendered.contains("htusdt"));
        assert!(rendered.contains(NOT_AVAILABLE));
        assert!(rendered.contains("3.0000"));
    }
}
