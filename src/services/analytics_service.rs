use sqlx::SqlitePool;
use tracing::info;

use crate::db::rating_queries;
use crate::errors::AppError;
use crate::llm::parse::parse_structured_response;
use crate::models::rating::AnalysisUpdate;

/// Writer for the analysis-derived half of the ratings cache.
///
/// Owns rating/score/confidence/rsi/sentiment/technical/fundamental/summary;
/// the price refresh job owns the price columns. The two writers touch
/// disjoint column sets, so they can never clobber each other.
pub async fn store_analysis(pool: &SqlitePool, update: AnalysisUpdate) -> Result<(), AppError> {
    rating_queries::upsert_analysis(pool, &update).await?;
    info!(
        "analysis stored for {}: {} ({}/{})",
        update.ticker, update.rating, update.score, update.confidence
    );
    Ok(())
}

/// Turn a model's raw response text into an analysis row for a ticker.
/// Returns false when the text carries no parseable structure.
pub async fn store_analysis_from_response(
    pool: &SqlitePool,
    ticker: &str,
    response_text: &str,
    rsi: Option<f64>,
    sentiment_score: Option<f64>,
) -> Result<bool, AppError> {
    let Some(parsed) = parse_structured_response(response_text) else {
        return Ok(false);
    };

    let sentiment_label = sentiment_score.map(|s| {
        if s > 0.1 {
            "bullish".to_string()
        } else if s < -0.1 {
            "bearish".to_string()
        } else {
            "neutral".to_string()
        }
    });

    store_analysis(
        pool,
        AnalysisUpdate {
            ticker: ticker.to_uppercase(),
            rating: parsed.rating,
            score: parsed.score as f64,
            confidence: parsed.confidence as f64,
            rsi,
            sentiment_score,
            sentiment_label,
            technical_score: None,
            fundamental_score: None,
            summary: Some(parsed.summary),
        },
    )
    .await?;
    Ok(true)
}
