//! Prompts for STA paper review.
//!
//! Every prompt lives here so a change to the task wording touches one place
//! and unit tests can inspect prompts without calling a model.
//!
//! Callers can override the task description via
//! [`crate::config::ReviewConfig::system_prompt`]; the example pair and the
//! document are always appended.

/// Fixed task description used when no override is configured.
pub const DEFAULT_TASK_PROMPT: &str = r#"You are a rigorous academic reviewer. Read the paper text provided below and evaluate it.

Return ONLY a single JSON object with exactly these keys:

- "title":      the paper title as written in the document
- "author":     a JSON array of author names, in order of appearance
- "score":      the STA score as "N/500" (0 = unusable, 500 = exemplary)
- "scoreUsage": one short paragraph explaining the criteria behind the STA score
                (structure, technical soundness, originality, clarity of argument)
- "aiScore":    the estimated probability that the text was written by an AI, as "N%"
- "aiReason":   the sentences or patterns that drove the AI estimate
- "summary":    a summary of the paper in 3–5 sentences

Rules:
- Do NOT wrap the JSON in code fences.
- Do NOT add commentary before or after the JSON.
- If a field cannot be determined, use null."#;

/// Example input excerpt shown to the model.
pub const EXAMPLE_INPUT: &str = "Predictive Sales Modeling for Convenience Stores Using Machine Learning Techniques  \
Kim, J. and Lee, S.  1. Introduction  1.1 Background  The convenience store industry occupies an important \
position in the domestic retail market due to 24-hour operation, accessibility and diverse product lines. \
This study forecasts future sales with machine learning techniques based on sales data ...  \
4.1 Metrics: RMSE, MAE  Baseline: RMSE 1453.2 / MAE 1044.5  LSTM: RMSE 1014.7 / MAE 792.3  \
5. Conclusion  The LSTM-based model showed the highest predictive performance ...";

/// Example output matching [`EXAMPLE_INPUT`].
pub const EXAMPLE_OUTPUT: &str = r#"{
  "title": "Predictive Sales Modeling for Convenience Stores Using Machine Learning Techniques",
  "author": ["Kim, J.", "Lee, S."],
  "score": "310/500",
  "scoreUsage": "Clear structure and a reasonable baseline comparison, but a public dataset with little novelty and no error analysis.",
  "aiScore": "85%",
  "aiReason": "Generic, evenly paced phrasing such as 'suggests applicability to real-time inventory and logistics management' with no concrete detail.",
  "summary": "The paper compares baseline, Random Forest, XGBoost and LSTM models for weekly convenience-store sales forecasting. LSTM achieves the lowest RMSE and MAE. The authors propose multivariate forecasting with external factors as future work."
}"#;

/// Build the single instruction-plus-document prompt.
///
/// Deterministic: the same task, example and text always yield the same
/// prompt. The extracted text is inserted verbatim.
pub fn build_review_prompt(task: Option<&str>, document_text: &str) -> String {
    let task = task.unwrap_or(DEFAULT_TASK_PROMPT);
    format!(
        "{task}\n\nExample input:\n{EXAMPLE_INPUT}\n\nExample output:\n{EXAMPLE_OUTPUT}\n\nPaper text:\n{document_text}"
    )
}
