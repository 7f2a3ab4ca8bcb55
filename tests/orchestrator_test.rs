//! 编排器集成测试：脚本化模型 + 替身工具 + 真实 save_event / SQLite 存储

use std::sync::Arc;

use async_trait::async_trait;
use clima::agent::AgentComponents;
use clima::core::{AgentError, SystemPrompt, TurnOrchestrator};
use clima::llm::{ModelResponse, Part, ScriptedModelClient};
use clima::memory::{EventFilter, InMemoryStore, Message, Role, SqliteStore};
use clima::mood::Mood;
use clima::tools::{
    CurrentDateTimeTool, SaveEventTool, Tool, ToolContext, ToolExecutor, ToolRegistry, ToolResult,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

struct StubGeocode;

#[async_trait]
impl Tool for StubGeocode {
    fn name(&self) -> &str {
        "geocode"
    }
    fn description(&self) -> &str {
        "stub"
    }
    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult {
        match args.get("address").and_then(Value::as_str) {
            Some("Navacerrada") => ToolResult::ok(json!({
                "location": "40.7833,-4.0167",
                "latitude": 40.7833,
                "longitude": -4.0167,
                "formatted_address": "Navacerrada, Madrid, España"
            })),
            _ => ToolResult::failure("No se encontró la ubicación (status ZERO_RESULTS)"),
        }
    }
}

struct StubWeather;

#[async_trait]
impl Tool for StubWeather {
    fn name(&self) -> &str {
        "fetch_weather"
    }
    fn description(&self) -> &str {
        "stub"
    }
    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::ok(json!({"data": {"status": "OK", "data": [
            {"parameter": "t_2m:C", "coordinates": [{"dates": [{"value": -2.0}]}]},
            {"parameter": "snow_depth:cm", "coordinates": [{"dates": [{"value": 12.0}]}]},
            {"parameter": "precip_1h:mm", "coordinates": [{"dates": [{"value": 0.1}]}]}
        ]}}))
    }
}

fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(StubGeocode);
    registry.register(StubWeather);
    registry.register(CurrentDateTimeTool);
    registry.register(SaveEventTool);
    registry
}

fn orchestrator(model: Arc<ScriptedModelClient>, max_iterations: usize) -> TurnOrchestrator {
    TurnOrchestrator::new(model, ToolExecutor::new(registry(), 5)).with_max_iterations(max_iterations)
}

fn ctx() -> ToolContext {
    ToolContext::new("ana", Arc::new(InMemoryStore::new()))
}

#[tokio::test]
async fn test_empty_input_never_reaches_model() {
    let model = Arc::new(ScriptedModelClient::new(vec![ModelResponse::text("x")]));
    let orch = orchestrator(model.clone(), 6);
    for input in ["", " ", "\n\t"] {
        let err = orch
            .process_turn(&[], &SystemPrompt::default(), input, &ctx(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput(_)));
    }
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn test_history_of_n_messages_sends_n_plus_one_contents() {
    let history = vec![
        Message::user("Hola"),
        Message::assistant("¡Hola! ¿Qué necesitas?"),
        Message::system("nota interna"),
        Message::user("¿Y mañana?"),
        Message::assistant("Soleado."),
    ];
    let model = Arc::new(ScriptedModelClient::new(vec![ModelResponse::text("De nada.")]));
    orchestrator(model.clone(), 6)
        .process_turn(&history, &SystemPrompt::default(), "Gracias", &ctx(), &CancellationToken::new())
        .await
        .unwrap();

    let request = &model.requests()[0];
    assert_eq!(request.contents.len(), history.len() + 1);
    let roles: Vec<&str> = request.contents.iter().map(|c| c.role.as_str()).collect();
    assert_eq!(roles, vec!["user", "model", "model", "user", "model", "user"]);
    assert_eq!(request.contents[3].text(), "¿Y mañana?");
    assert_eq!(request.contents[5].text(), "Gracias");
}

#[tokio::test]
async fn test_model_always_requesting_tools_hits_cap() {
    let model = Arc::new(ScriptedModelClient::repeating(ModelResponse::function_call(
        "geocode",
        json!({"address": "Navacerrada"}),
    )));
    let err = orchestrator(model.clone(), 4)
        .process_turn(&[], &SystemPrompt::default(), "¿dónde?", &ctx(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ToolLoopExceeded { limit: 4 }));
    assert_eq!(model.call_count(), 4);
}

#[tokio::test]
async fn test_unknown_tool_and_failures_are_fed_back() {
    let model = Arc::new(ScriptedModelClient::new(vec![
        ModelResponse::function_call("teleport", json!({"to": "Marte"})),
        ModelResponse::function_call("geocode", json!({"address": "Atlántida"})),
        ModelResponse::text("No encuentro ese lugar, ¿puedes concretar?"),
    ]));
    let outcome = orchestrator(model.clone(), 6)
        .process_turn(&[], &SystemPrompt::default(), "Clima en Atlántida", &ctx(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.mood, Mood::Neutral);
    assert_eq!(outcome.tool_calls.len(), 2);
    assert!(outcome.tool_calls.iter().all(|c| !c.success));

    let last = model.requests().pop().unwrap();
    let responses: Vec<Value> = last
        .contents
        .iter()
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| match p {
            Part::FunctionResponse(r) => Some(r.response.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0], json!({"success": false, "error": "unknown tool: teleport"}));
    assert_eq!(responses[1]["success"], false);
}

#[tokio::test]
async fn test_full_turn_saves_event_with_weather() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("clima.db")).unwrap());
    let model = Arc::new(ScriptedModelClient::new(vec![
        ModelResponse::function_call("current_datetime", json!({})),
        ModelResponse::function_call("geocode", json!({"address": "Navacerrada"})),
        ModelResponse::function_call(
            "fetch_weather",
            json!({
                "datetime_range": "2099-01-10T10:00:00Z",
                "parameters": "t_2m:C,snow_depth:cm,precip_1h:mm",
                "coordinates": "40.7833,-4.0167"
            }),
        ),
        ModelResponse::function_call(
            "save_event",
            json!({
                "event_name": "Esquí en Navacerrada",
                "event_date": "2099-01-10T10:00:00",
                "location_name": "Navacerrada",
                "latitude": 40.7833,
                "longitude": -4.0167,
                "weather_data_json": "{'data': [{'parameter': 't_2m:C', 'coordinates': [{'dates': [{'value': -2.0}]}]}, {'parameter': 'snow_depth:cm', 'coordinates': [{'dates': [{'value': 12.0}]}]}]}"
            }),
        ),
        ModelResponse::text("Te espera un buen día en la montaña."),
    ]));
    let agent = AgentComponents::new(orchestrator(model.clone(), 6), SystemPrompt::default(), store.clone());
    let conv = agent.start_conversation("ana", Some("Esquí")).unwrap();

    let reply = agent
        .send_message(conv.id, "ana", "Guarda mi día de esquí del 10 de enero", &CancellationToken::new())
        .await
        .unwrap();

    let names: Vec<&str> = reply.tool_calls.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["current_datetime", "geocode", "fetch_weather", "save_event"]);
    assert!(reply.tool_calls.iter().all(|c| c.success));
    // 回复文本没有关键词，mood 来自 fetch_weather 的数据
    assert_eq!(reply.mood, Mood::Snow);
    assert_eq!(model.call_count(), 5);

    let events = agent.events("ana", EventFilter::Upcoming).unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.name, "Esquí en Navacerrada");
    assert_eq!(event.conversation_id, Some(conv.id));
    assert_eq!(event.temperature, Some(-2.0));
    assert_eq!(event.snow, Some(12.0));
    assert_eq!(event.latitude, Some(40.7833));

    // 重新打开数据库，对话与事件仍在
    drop(agent);
    drop(store);
    let reopened = SqliteStore::open(dir.path().join("clima.db")).unwrap();
    let agent = AgentComponents::new(
        orchestrator(Arc::new(ScriptedModelClient::new(vec![])), 6),
        SystemPrompt::default(),
        Arc::new(reopened),
    );
    let history = agent.history(conv.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].content, "Te espera un buen día en la montaña.");
    assert_eq!(agent.events("ana", EventFilter::All).unwrap().len(), 1);
}
