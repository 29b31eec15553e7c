//! Agent executor backed by an OpenAI-compatible chat completions model.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{parse_plan_steps, AgentExecutor, ExecutionError, StepRequest};
use crate::llm::{ChatMessage, LlmClient, Role, ToolCall, ToolDefinition};
use crate::mcp::ToolConnection;

const PLANNER_INSTRUCTIONS: &str = "You are a planning agent. Break the user's request into a \
numbered, step-by-step plan. Each step must be on its own line and start with its number \
(\"1.\", \"2.\", ...). Refer to tools by their exact names from the list below. Do not execute \
anything yet; only produce the plan.";

const EXECUTOR_INSTRUCTIONS: &str = "You are an execution agent carrying out ONE step of an \
approved plan. Use the available tools as needed to complete the current step only, then reply \
with the outcome of that step.";

/// Runs planning and plan steps through an LLM with MCP tools exposed as functions.
pub struct OpenRouterExecutor {
    client: Arc<dyn LlmClient>,
    model: String,
    max_iterations: usize,
}

impl OpenRouterExecutor {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>, max_iterations: usize) -> Self {
        Self {
            client,
            model: model.into(),
            max_iterations: max_iterations.max(1),
        }
    }

    /// Send `messages` and resolve tool calls until the model answers in text.
    async fn run_conversation(
        &self,
        mut messages: Vec<ChatMessage>,
        tools: &[Arc<ToolConnection>],
    ) -> Result<String, ExecutionError> {
        let toolbox = Toolbox::new(tools);

        for iteration in 0..self.max_iterations {
            let response = self
                .client
                .chat_completion(&self.model, &messages, Some(&toolbox.definitions))
                .await?;

            let Some(tool_calls) = response.tool_calls else {
                return Ok(response.content.unwrap_or_default());
            };

            tracing::debug!(
                iteration = iteration,
                "Model requested {} tool call(s)",
                tool_calls.len()
            );
            messages.push(ChatMessage::assistant_tool_calls(
                response.content,
                tool_calls.clone(),
            ));
            for call in &tool_calls {
                let output = toolbox.invoke(call).await;
                messages.push(ChatMessage::tool_result(&call.id, output));
            }
        }

        Err(ExecutionError::IterationLimit(self.max_iterations))
    }
}

#[async_trait]
impl AgentExecutor for OpenRouterExecutor {
    async fn create_plan(
        &self,
        prompt: &str,
        tools: &[Arc<ToolConnection>],
    ) -> Result<String, ExecutionError> {
        let system = format!("{}\n\nAvailable tools:\n{}", PLANNER_INSTRUCTIONS, describe_tools(tools));
        let messages = vec![
            ChatMessage::new(Role::System, system),
            ChatMessage::new(Role::User, prompt),
        ];
        let plan = self.run_conversation(messages, tools).await?;
        if plan.trim().is_empty() {
            return Err(ExecutionError::Failed("Planner returned an empty plan".to_string()));
        }
        Ok(plan)
    }

    async fn execute_step(
        &self,
        request: StepRequest<'_>,
        tools: &[Arc<ToolConnection>],
    ) -> Result<String, ExecutionError> {
        let steps = parse_plan_steps(request.plan);
        let step = steps
            .get(request.step_index)
            .ok_or(ExecutionError::StepOutOfRange {
                index: request.step_index,
                total: steps.len(),
            })?;

        let user = format!(
            "Original request: {}\n\nFull plan:\n{}\n\nPrevious step result: {}\n\nCurrent step to execute: {}",
            request.prompt,
            request.plan,
            request.previous_result.unwrap_or("None"),
            step
        );
        let messages = vec![
            ChatMessage::new(Role::System, EXECUTOR_INSTRUCTIONS),
            ChatMessage::new(Role::User, user),
        ];
        self.run_conversation(messages, tools).await
    }
}

fn describe_tools(tools: &[Arc<ToolConnection>]) -> String {
    let lines: Vec<String> = tools
        .iter()
        .flat_map(|connection| connection.tools().iter())
        .map(|tool| format!("- {}: {}", tool.name, tool.description))
        .collect();
    if lines.is_empty() {
        "(none)".to_string()
    } else {
        lines.join("\n")
    }
}

/// Function definitions for every advertised tool plus routing back to its connection.
struct Toolbox {
    definitions: Vec<ToolDefinition>,
    routes: HashMap<String, Arc<ToolConnection>>,
}

impl Toolbox {
    fn new(connections: &[Arc<ToolConnection>]) -> Self {
        let mut definitions = Vec::new();
        let mut routes: HashMap<String, Arc<ToolConnection>> = HashMap::new();
        for connection in connections {
            for tool in connection.tools() {
                if routes.contains_key(&tool.name) {
                    tracing::warn!(
                        tool_id = %connection.id(),
                        "Tool '{}' already provided by another server, ignoring",
                        tool.name
                    );
                    continue;
                }
                let parameters = if tool.input_schema.is_object() {
                    tool.input_schema.clone()
                } else {
                    serde_json::json!({ "type": "object", "properties": {} })
                };
                definitions.push(ToolDefinition::function(&tool.name, &tool.description, parameters));
                routes.insert(tool.name.clone(), Arc::clone(connection));
            }
        }
        Self { definitions, routes }
    }

    /// Run a tool call; failures are reported back to the model as text.
    async fn invoke(&self, call: &ToolCall) -> String {
        let name = &call.function.name;
        let Some(connection) = self.routes.get(name) else {
            return format!("Error: unknown tool '{}'", name);
        };
        let arguments = if call.function.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(&call.function.arguments) {
                Ok(arguments) => arguments,
                Err(e) => return format!("Error: invalid arguments for '{}': {}", name, e),
            }
        };

        tracing::info!(tool_id = %connection.id(), "Calling tool '{}'", name);
        match connection.call_tool(name, arguments).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(tool_id = %connection.id(), "Tool '{}' failed: {}", name, e);
                format!("Error: {}", e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::llm::{ChatResponse, FunctionCall, LlmError};
    use crate::mcp::testing::FakeTransport;

    /// Replays queued responses and records the messages it was sent.
    #[derive(Default)]
    struct ScriptedClient {
        responses: Mutex<VecDeque<ChatResponse>>,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn chat_completion(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
        ) -> Result<ChatResponse, LlmError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::Parse("script exhausted".to_string()))
        }
    }

    fn text(content: &str) -> ChatResponse {
        ChatResponse {
            content: Some(content.to_string()),
            ..Default::default()
        }
    }

    fn tool_call(name: &str, arguments: &str) -> ChatResponse {
        ChatResponse {
            tool_calls: Some(vec![ToolCall {
                id: "call_1".to_string(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                },
            }]),
            ..Default::default()
        }
    }

    async fn connection(id: &str) -> Arc<ToolConnection> {
        let closed = Arc::new(Mutex::new(Vec::new()));
        Arc::new(
            ToolConnection::open(id, None, Box::new(FakeTransport::new(id, closed)))
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn plan_lists_tools_in_system_prompt() {
        let client = Arc::new(ScriptedClient::new(vec![text("1. use fs_tool")]));
        let executor = OpenRouterExecutor::new(client.clone(), "model", 3);
        let tools = vec![connection("fs").await];

        let plan = executor.create_plan("read it", &tools).await.unwrap();
        assert_eq!(plan, "1. use fs_tool");

        let requests = client.requests.lock().unwrap();
        let system = requests[0][0].content.clone().unwrap();
        assert!(system.contains("- fs_tool: fake"));
    }

    #[tokio::test]
    async fn empty_plan_is_an_error() {
        let client = Arc::new(ScriptedClient::new(vec![text("   ")]));
        let executor = OpenRouterExecutor::new(client, "model", 3);
        assert!(matches!(
            executor.create_plan("x", &[]).await,
            Err(ExecutionError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn step_routes_tool_calls_and_returns_final_text() {
        let client = Arc::new(ScriptedClient::new(vec![
            tool_call("fs_tool", r#"{"path":"a.txt"}"#),
            text("step finished"),
        ]));
        let executor = OpenRouterExecutor::new(client.clone(), "model", 3);
        let tools = vec![connection("fs").await];

        let request = StepRequest {
            prompt: "read it",
            plan: "1. read\n2. summarize",
            step_index: 1,
            previous_result: Some("contents"),
        };
        let result = executor.execute_step(request, &tools).await.unwrap();
        assert_eq!(result, "step finished");

        let requests = client.requests.lock().unwrap();
        let user = requests[0][1].content.clone().unwrap();
        assert!(user.contains("Previous step result: contents"));
        assert!(user.contains("Current step to execute: 2. summarize"));

        let tool_message = requests[1].last().unwrap();
        assert_eq!(tool_message.role, Role::Tool);
        assert_eq!(tool_message.content.as_deref(), Some("fs ok"));
    }

    #[tokio::test]
    async fn first_step_reports_none_previous_result() {
        let client = Arc::new(ScriptedClient::new(vec![text("ok")]));
        let executor = OpenRouterExecutor::new(client.clone(), "model", 3);
        let request = StepRequest {
            prompt: "p",
            plan: "1. only",
            step_index: 0,
            previous_result: None,
        };
        executor.execute_step(request, &[]).await.unwrap();
        let user = client.requests.lock().unwrap()[0][1].content.clone().unwrap();
        assert!(user.contains("Previous step result: None"));
    }

    #[tokio::test]
    async fn step_index_out_of_range() {
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let executor = OpenRouterExecutor::new(client, "model", 3);
        let request = StepRequest {
            prompt: "p",
            plan: "1. only",
            step_index: 1,
            previous_result: None,
        };
        assert!(matches!(
            executor.execute_step(request, &[]).await,
            Err(ExecutionError::StepOutOfRange { index: 1, total: 1 })
        ));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_model() {
        let client = Arc::new(ScriptedClient::new(vec![tool_call("nope", ""), text("gave up")]));
        let executor = OpenRouterExecutor::new(client.clone(), "model", 3);
        let result = executor.create_plan("x", &[]).await.unwrap();
        assert_eq!(result, "gave up");
        let requests = client.requests.lock().unwrap();
        assert_eq!(
            requests[1].last().unwrap().content.as_deref(),
            Some("Error: unknown tool 'nope'")
        );
    }

    #[tokio::test]
    async fn iteration_limit_is_enforced() {
        let client = Arc::new(ScriptedClient::new(vec![
            tool_call("fs_tool", "{}"),
            tool_call("fs_tool", "{}"),
        ]));
        let executor = OpenRouterExecutor::new(client, "model", 2);
        let tools = vec![connection("fs").await];
        assert!(matches!(
            executor.create_plan("loop", &tools).await,
            Err(ExecutionError::IterationLimit(2))
        ));
    }

    #[tokio::test]
    async fn llm_failure_propagates() {
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let executor = OpenRouterExecutor::new(client, "model", 2);
        assert!(matches!(
            executor.create_plan("x", &[]).await,
            Err(ExecutionError::Llm(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_tool_names_keep_first_server() {
        let a = connection("a").await;
        let mut transport = FakeTransport::new("b", Arc::new(Mutex::new(Vec::new())));
        transport.responses.insert(
            "tools/list".to_string(),
            serde_json::json!({ "tools": [{ "name": "a_tool" }] }),
        );
        let b = Arc::new(ToolConnection::open("b", None, Box::new(transport)).await.unwrap());

        let toolbox = Toolbox::new(&[a, b]);
        assert_eq!(toolbox.definitions.len(), 1);
        assert_eq!(toolbox.routes["a_tool"].id(), "a");
    }
}
