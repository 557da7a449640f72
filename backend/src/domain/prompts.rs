//! Prompt templates sent to the language model.

/// Opening prompt for a chat: the user's goal plus the grounding rows.
///
/// # Examples
/// ```
/// use gateway::domain::prompts::initial_analysis;
///
/// let prompt = initial_analysis("find churn", "[]");
/// assert!(prompt.contains("\"find churn\""));
/// assert!(prompt.contains("```json\n[]\n```"));
/// ```
pub fn initial_analysis(goal: &str, data_json: &str) -> String {
    format!(
        "You are an expert data analyst. A user has run an SQL query to retrieve a dataset \
and has asked an opening question to begin an analysis.

The user's high-level goal is: \"{goal}\"

The rows returned by the query are given below as a JSON array. Using this data, give a \
thorough initial analysis that answers the user's goal directly. Format the answer as \
readable markdown.

Retrieved data:
```json
{data_json}
```
"
    )
}
