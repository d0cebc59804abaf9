//! Query Rewriting Module
//!
//! Turns the latest user turn into a catalog search: a query string plus
//! optional price/brand filters. The model is offered a `search_database` tool
//! and its call arguments are decoded into typed filters.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::error::{RagError, Result};
use crate::llm::{ChatClient, ChatCompletion, ChatCompletionRequest, ChatMessage, ToolSchema};
use crate::tokens::{build_messages, get_token_limit, TokenCounter};
use crate::types::{Filter, FilterColumn, FilterValue};

pub const SEARCH_TOOL_NAME: &str = "search_database";

const QUERY_RESPONSE_TOKEN_LIMIT: usize = 500;

pub const QUERY_PROMPT: &str = "Below is a history of the conversation so far, and a new question asked by the user that needs to be answered by searching the product catalog.
Generate a search query based on the conversation and the new question.
If the question mentions a price or a brand, also set the matching filter.
Do not include cited source ids like [1] or [2] in the search query.
Do not include any text inside [] or <<>> in the search query terms.
If the question is not in English, translate the search query terms to English.
If you cannot generate a search query, return just the number 0.";

/// The single tool declared to the model.
pub fn build_search_function() -> Vec<ToolSchema> {
    vec![ToolSchema {
        name: SEARCH_TOOL_NAME.to_string(),
        description: "Search PostgreSQL database for relevant products based on the user query"
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "search_query": {
                    "type": "string",
                    "description": "Query string to use for full text search, e.g. 'red shoes'"
                },
                "price_filter": {
                    "type": "object",
                    "description": "Filter search results based on price of the product",
                    "properties": {
                        "comparison_operator": {
                            "type": "string",
                            "description": "Operator to compare the column value, either '>', '<', '>=', '<=', '=='"
                        },
                        "value": {
                            "type": "number",
                            "description": "Value to compare against, e.g. 30"
                        }
                    }
                },
                "brand_filter": {
                    "type": "object",
                    "description": "Filter search results based on brand of the product",
                    "properties": {
                        "comparison_operator": {
                            "type": "string",
                            "description": "Operator to compare the column value, either '==' or '!='"
                        },
                        "value": {
                            "type": "string",
                            "description": "Value to compare against, e.g. AirStrider"
                        }
                    }
                }
            },
            "required": ["search_query"]
        }),
    }]
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchDatabaseArgs {
    search_query: Option<String>,
    price_filter: Option<PriceFilterArg>,
    brand_filter: Option<BrandFilterArg>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PriceFilterArg {
    comparison_operator: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BrandFilterArg {
    comparison_operator: String,
    value: String,
}

/// What the extractor produced: `search_query == None` means nothing to search for.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchArguments {
    pub search_query: Option<String>,
    pub filters: Vec<Filter>,
}

/// Read search arguments out of a completion.
///
/// Every `function` call to `search_database` is decoded in order; filters
/// accumulate and the last call's query wins. Without tool calls, trimmed text
/// content is the query.
pub fn extract_search_arguments(completion: &ChatCompletion) -> Result<SearchArguments> {
    let message = completion
        .first_message()
        .ok_or_else(|| RagError::Completion("No choices in query rewrite response".into()))?;

    let mut arguments = SearchArguments::default();

    match message.tool_calls.as_deref() {
        Some(calls) if !calls.is_empty() => {
            for call in calls {
                if call.kind != "function" || call.function.name != SEARCH_TOOL_NAME {
                    continue;
                }
                let args: SearchDatabaseArgs = serde_json::from_str(&call.function.arguments)
                    .map_err(RagError::ToolArguments)?;

                arguments.search_query = args.search_query;
                if let Some(price) = args.price_filter {
                    arguments.filters.push(Filter {
                        column: FilterColumn::Price,
                        comparison_operator: price.comparison_operator,
                        value: FilterValue::Number(price.value),
                    });
                }
                if let Some(brand) = args.brand_filter {
                    arguments.filters.push(Filter {
                        column: FilterColumn::Brand,
                        comparison_operator: brand.comparison_operator,
                        value: FilterValue::Text(brand.value),
                    });
                }
            }
        }
        _ => {
            arguments.search_query = message
                .content
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string);
        }
    }

    Ok(arguments)
}

/// Asks the chat model to rewrite the conversation into search arguments.
pub struct QueryRewriter {
    chat_client: Arc<dyn ChatClient>,
    chat_model: String,
    chat_deployment: Option<String>,
    counter: TokenCounter,
    token_limit: usize,
}

impl QueryRewriter {
    pub fn new(
        chat_client: Arc<dyn ChatClient>,
        chat_model: &str,
        chat_deployment: Option<&str>,
    ) -> Result<Self> {
        let counter = TokenCounter::for_model(chat_model, true)?;
        Self::with_counter(chat_client, chat_model, chat_deployment, counter)
    }

    pub(crate) fn with_counter(
        chat_client: Arc<dyn ChatClient>,
        chat_model: &str,
        chat_deployment: Option<&str>,
        counter: TokenCounter,
    ) -> Result<Self> {
        Ok(Self {
            chat_client,
            chat_model: chat_model.to_string(),
            chat_deployment: chat_deployment.map(str::to_string),
            counter,
            token_limit: get_token_limit(chat_model, true)?,
        })
    }

    pub async fn rewrite(
        &self,
        past_messages: &[ChatMessage],
        user_query: &str,
    ) -> Result<SearchArguments> {
        let messages = build_messages(
            &self.counter,
            QUERY_PROMPT,
            user_query,
            past_messages,
            self.token_limit.saturating_sub(QUERY_RESPONSE_TOKEN_LIMIT),
        );

        let request = ChatCompletionRequest {
            model: self
                .chat_deployment
                .clone()
                .unwrap_or_else(|| self.chat_model.clone()),
            messages,
            temperature: 0.0,
            max_tokens: QUERY_RESPONSE_TOKEN_LIMIT,
            n: 1,
            stream: false,
            tools: build_search_function(),
        };

        let completion = self.chat_client.complete(&request).await?;
        let arguments = extract_search_arguments(&completion)?;

        tracing::info!(
            search_query = ?arguments.search_query,
            filters = arguments.filters.len(),
            "Rewrote user question into search arguments"
        );
        Ok(arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;
    use crate::testing::{
        completion_with_content, completion_with_tool_calls, MockChatClient,
    };

    fn search_call(arguments: &str) -> ToolCall {
        ToolCall::function("call_abc123", SEARCH_TOOL_NAME, arguments)
    }

    #[test]
    fn test_schema_shape() {
        let tools = build_search_function();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "search_database");
        assert_eq!(tools[0].parameters["required"], json!(["search_query"]));
        assert_eq!(
            tools[0].parameters["properties"]["price_filter"]["properties"]["value"]["type"],
            "number"
        );
    }

    #[test]
    fn test_query_only() {
        let completion =
            completion_with_tool_calls(vec![search_call(r#"{"search_query":"climbing gear"}"#)]);

        let args = extract_search_arguments(&completion).unwrap();

        assert_eq!(args.search_query.as_deref(), Some("climbing gear"));
        assert!(args.filters.is_empty());
    }

    #[test]
    fn test_price_and_brand_filters_in_order() {
        let completion = completion_with_tool_calls(vec![search_call(
            r#"{"search_query":"climbing gear",
                "price_filter":{"comparison_operator":">","value":30},
                "brand_filter":{"comparison_operator":"==","value":"AirStrider"}}"#,
        )]);

        let args = extract_search_arguments(&completion).unwrap();

        assert_eq!(
            args.filters,
            vec![
                Filter {
                    column: FilterColumn::Price,
                    comparison_operator: ">".into(),
                    value: FilterValue::Number(30.0),
                },
                Filter {
                    column: FilterColumn::Brand,
                    comparison_operator: "==".into(),
                    value: FilterValue::Text("AirStrider".into()),
                },
            ]
        );
    }

    #[test]
    fn test_text_content_fallback() {
        let completion = completion_with_content(Some("  waterproof tent  \n"));

        let args = extract_search_arguments(&completion).unwrap();

        assert_eq!(args.search_query.as_deref(), Some("waterproof tent"));
        assert!(args.filters.is_empty());
    }

    #[test]
    fn test_no_tool_call_no_content() {
        let args = extract_search_arguments(&completion_with_content(None)).unwrap();
        assert_eq!(args, SearchArguments::default());

        let args = extract_search_arguments(&completion_with_content(Some("   "))).unwrap();
        assert_eq!(args.search_query, None);
    }

    #[test]
    fn test_other_tools_ignored() {
        let mut not_function = search_call(r#"{"search_query":"ignored"}"#);
        not_function.kind = "code_interpreter".into();
        let other_name = ToolCall::function("call_2", "lookup_weather", "not json at all");
        let completion = completion_with_tool_calls(vec![not_function, other_name]);

        let args = extract_search_arguments(&completion).unwrap();

        assert_eq!(args, SearchArguments::default());
    }

    #[test]
    fn test_filters_accumulate_across_calls() {
        let completion = completion_with_tool_calls(vec![
            search_call(r#"{"search_query":"tent","price_filter":{"comparison_operator":"<","value":100}}"#),
            search_call(r#"{"search_query":"dome tent","price_filter":{"comparison_operator":">","value":20}}"#),
        ]);

        let args = extract_search_arguments(&completion).unwrap();

        assert_eq!(args.search_query.as_deref(), Some("dome tent"));
        assert_eq!(args.filters.len(), 2);
        assert_eq!(args.filters[0].comparison_operator, "<");
        assert_eq!(args.filters[1].comparison_operator, ">");
    }

    #[test]
    fn test_malformed_arguments_fail() {
        let completion = completion_with_tool_calls(vec![search_call("{\"search_query\": ")]);
        assert!(matches!(
            extract_search_arguments(&completion),
            Err(RagError::ToolArguments(_))
        ));

        let unknown = completion_with_tool_calls(vec![search_call(
            r#"{"search_query":"tent","color_filter":"red"}"#,
        )]);
        assert!(extract_search_arguments(&unknown).is_err());

        let missing_value = completion_with_tool_calls(vec![search_call(
            r#"{"search_query":"tent","price_filter":{"comparison_operator":">"}}"#,
        )]);
        assert!(extract_search_arguments(&missing_value).is_err());
    }

    #[tokio::test]
    async fn test_rewrite_sends_tool_and_prompt() {
        let client = Arc::new(MockChatClient::new().with_response(completion_with_tool_calls(
            vec![search_call(r#"{"search_query":"hiking boots"}"#)],
        )));
        let rewriter = QueryRewriter::new(client.clone(), "gpt-35-turbo", Some("chat")).unwrap();

        let past = vec![ChatMessage::user("hello"), ChatMessage::assistant("Hi!")];
        let args = rewriter.rewrite(&past, "any boots for hiking?").await.unwrap();

        assert_eq!(args.search_query.as_deref(), Some("hiking boots"));
        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "chat");
        assert_eq!(requests[0].temperature, 0.0);
        assert_eq!(requests[0].max_tokens, 500);
        assert_eq!(requests[0].tools, build_search_function());
        assert_eq!(requests[0].messages.len(), 4);
        assert_eq!(requests[0].messages[0].content.as_deref(), Some(QUERY_PROMPT));
        assert_eq!(
            requests[0].messages[3].content.as_deref(),
            Some("any boots for hiking?")
        );
    }
}
