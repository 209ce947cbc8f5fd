//! `/next`: a multi-turn check-in driven by a cursor kept in the shared
//! store. Guided mode walks a fixed question list and ends with a plan;
//! open mode lets the model decide when it has enough to emit tasks.

use actix_web::{web, HttpRequest, HttpResponse};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::optional_owner;
use crate::chat::open_session;
use crate::error::AppError;
use crate::extraction::extract_tasks;
use crate::llm::Prompt;
use crate::models::{ChatMessage, ConversationState, FlowMode, MessageRole, Task};

/// (answer key, question), asked in this order.
pub const FLOW: [(&str, &str); 8] = [
    ("userMood", "How are you feeling today?"),
    ("focusScore", "On a scale of 1 to 10, how focused do you feel?"),
    ("tasksList", "What are the main tasks you want to work on today?"),
    ("deadlines", "Do you have any deadlines today?"),
    ("importantTask", "What is your most important task?"),
    ("workSession", "How long do you want each work session to be?"),
    ("syncCalendar", "Would you like to sync with your calendar?"),
    ("focusMode", "Should I enable focus mode for you?"),
];

/// Open conversations are forced to wrap up after this many turns.
pub const MAX_OPEN_TURNS: u32 = 10;

const COACH_PROMPT: &str =
    "You are a friendly productivity coach guiding a user through a daily productivity check-in.";
const PLANNER_PROMPT: &str = "You are a friendly productivity coach.";
const OPEN_PROMPT: &str = r#"You are a friendly productivity coach helping a user plan their day.
Ask one short, natural question at a time to learn about their mood, tasks and deadlines.
When you know enough, stop asking and reply with a JSON list of tasks inside a ```json code block:
[{"task":"<task>","estimatedTime":"<time>"}]
followed by a short, encouraging plan."#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextRequest {
    pub session_id: Option<String>,
    pub message: Option<String>,
    pub client_id: Option<String>,
    pub mode: Option<FlowMode>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextResponse {
    pub reply: String,
    pub is_final: bool,
    /// Turns completed so far in this conversation.
    pub step: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,
}

fn question_prompt(state: &ConversationState, question: &str) -> Result<Prompt, AppError> {
    let answers = serde_json::to_string_pretty(&state.answers)
        .map_err(|e| AppError::Storage(format!("Error serializing answers: {}", e)))?;
    let user = format!(
        "Previous answers: {}\n\nYour task:\n\
         1. Polite acknowledgment of the user's previous answer (if exists).\n\
         2. Then ask the next question: \"{}\"\n\
         3. Keep it short, natural, friendly, and encouraging.",
        answers, question
    );
    Ok(Prompt::new(COACH_PROMPT, user, 150))
}

fn plan_prompt(state: &ConversationState) -> Prompt {
    let answer = |key: &str| {
        state
            .answers
            .get(key)
            .map(String::as_str)
            .filter(|a| !a.is_empty())
            .unwrap_or("N/A")
    };
    let user = format!(
        "Create a clear and concise daily productivity plan based on these inputs:\n\n\
         Mood: {}\nFocus score: {}\nTasks: {}\nDeadlines: {}\nMost important task: {}\n\
         Work session length: {}\nCalendar sync: {}\nFocus mode: {}\n\n\
         Format the output as 5 to 8 bullet points, clear and actionable.",
        answer("userMood"),
        answer("focusScore"),
        answer("tasksList"),
        answer("deadlines"),
        answer("importantTask"),
        answer("workSession"),
        answer("syncCalendar"),
        answer("focusMode"),
    );
    Prompt::new(PLANNER_PROMPT, user, 300)
}

fn open_prompt(state: &ConversationState) -> Prompt {
    let mut user = format!("Conversation so far:\n{}", state.history.join("\n"));
    if state.step + 1 >= MAX_OPEN_TURNS {
        user.push_str("\n\nThis is the last turn: reply with the JSON task list and plan now.");
    }
    Prompt::new(OPEN_PROMPT, user, 400)
}

/// Result of one turn, before it is rendered.
struct Turn {
    reply: String,
    is_final: bool,
    step: u32,
    tasks: Vec<Task>,
}

async fn guided_turn(
    data: &AppState,
    mut state: ConversationState,
    message: &str,
) -> Result<Turn, AppError> {
    let step = state.step as usize;
    if step > 0 && step <= FLOW.len() {
        let (key, _) = FLOW[step - 1];
        state.answers.insert(key.to_string(), message.to_string());
    }

    if step >= FLOW.len() {
        let plan = data.generator.generate(&plan_prompt(&state)).await?;
        data.storage.delete_state(&state.session_id, state.version).await?;
        info!("Questionnaire {} finished", state.session_id);
        return Ok(Turn {
            reply: plan,
            is_final: true,
            step: state.step,
            tasks: Vec::new(),
        });
    }

    let (_, question) = FLOW[step];
    let reply = data.generator.generate(&question_prompt(&state, question)?).await?;
    state.step += 1;
    data.storage.save_state(&mut state).await?;

    Ok(Turn {
        reply,
        is_final: false,
        step: state.step,
        tasks: Vec::new(),
    })
}

async fn open_turn(
    data: &AppState,
    mut state: ConversationState,
    message: &str,
    owner: Option<&str>,
) -> Result<Turn, AppError> {
    if !message.is_empty() {
        state.history.push(format!("User: {}", message));
    }
    let reply = data.generator.generate(&open_prompt(&state)).await?;
    state.history.push(format!("Assistant: {}", reply));
    state.step += 1;

    let extracted = extract_tasks(&reply);
    let is_final = !extracted.is_empty() || state.step >= MAX_OPEN_TURNS;
    if !is_final {
        data.storage.save_state(&mut state).await?;
        return Ok(Turn {
            reply,
            is_final,
            step: state.step,
            tasks: Vec::new(),
        });
    }

    data.storage.delete_state(&state.session_id, state.version).await?;
    let tasks: Vec<Task> = match owner {
        Some(owner) => extracted
            .iter()
            .map(|t| Task::new(owner, &t.title, t.estimated_minutes, Some(state.session_id.clone())))
            .collect(),
        None => {
            if !extracted.is_empty() {
                warn!(
                    "Dropping {} tasks from anonymous conversation {}",
                    extracted.len(),
                    state.session_id
                );
            }
            Vec::new()
        }
    };
    data.storage.insert_tasks(&tasks).await?;
    info!("Open conversation {} finished with {} tasks", state.session_id, tasks.len());

    Ok(Turn {
        reply,
        is_final,
        step: state.step,
        tasks,
    })
}

/// POST /next
pub async fn next_step(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<NextRequest>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    let session_id = payload
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Validation("Missing session ID".into()))?
        .to_string();
    let message = payload.message.as_deref().map(str::trim).unwrap_or_default().to_string();
    let owner = optional_owner(&req, payload.client_id.as_deref());

    // Transcript is only kept for callers we can attribute it to.
    let user_message = match &owner {
        Some(owner) => {
            let session = open_session(data.storage.as_ref(), &session_id, owner).await?;
            Some(ChatMessage::new(&session.id, MessageRole::User, &message))
        }
        None => None,
    };

    let state = data
        .storage
        .load_or_create_state(&session_id, payload.mode.unwrap_or_default())
        .await?;
    let turn = match state.mode {
        FlowMode::Guided => guided_turn(&data, state, &message).await?,
        FlowMode::Open => open_turn(&data, state, &message, owner.as_deref()).await?,
    };

    if let Some(user_message) = user_message {
        if !message.is_empty() {
            data.storage.append_message(&user_message).await?;
        }
        data.storage
            .append_message(&ChatMessage::new(&session_id, MessageRole::Assistant, &turn.reply))
            .await?;
        if turn.is_final {
            data.storage.finish_session(&session_id).await?;
        }
    }

    Ok(HttpResponse::Ok().json(NextResponse {
        reply: turn.reply,
        is_final: turn.is_final,
        step: turn.step,
        tasks: turn.tasks,
    }))
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::{json, Value};

    use super::{FLOW, MAX_OPEN_TURNS};
    use crate::models::FlowMode;
    use crate::storage::Storage;
    use crate::test_support::{test_app, test_state, ScriptedGenerator};

    fn next(body: Value) -> test::TestRequest {
        test::TestRequest::post().uri("/next").set_json(body)
    }

    #[actix_web::test]
    async fn fresh_session_gets_first_question() {
        let generator = ScriptedGenerator::new();
        generator.push_reply("Hi! How are you feeling today?");
        let (state, storage) = test_state(generator.clone());
        let app = test_app!(state);

        let body: Value =
            test::call_and_read_body_json(&app, next(json!({ "sessionId": "q-1", "message": "start" })).to_request())
                .await;
        assert_eq!(body["isFinal"], false);
        assert_eq!(body["step"], 1);
        assert_eq!(body["reply"], "Hi! How are you feeling today?");
        assert!(generator.last_prompt().user.contains(FLOW[0].1));

        let stored = storage.load_or_create_state("q-1", FlowMode::Guided).await.unwrap();
        assert_eq!(stored.step, 1);
        assert!(stored.answers.is_empty());
    }

    #[actix_web::test]
    async fn full_walkthrough_ends_with_plan_and_resets() {
        let generator = ScriptedGenerator::new();
        let (state, storage) = test_state(generator.clone());
        let app = test_app!(state);

        let first: Value =
            test::call_and_read_body_json(&app, next(json!({ "sessionId": "q-2", "message": "" })).to_request())
                .await;
        assert_eq!(first["step"], 1);

        // One answer per question; the last answer triggers the plan.
        for i in 0..FLOW.len() {
            if i + 1 == FLOW.len() {
                generator.push_reply("- Start with the report\n- Take a walk");
            }
            let body: Value = test::call_and_read_body_json(
                &app,
                next(json!({ "sessionId": "q-2", "message": format!("answer {}", i) })).to_request(),
            )
            .await;
            if i + 1 < FLOW.len() {
                assert_eq!(body["isFinal"], false);
                assert_eq!(body["step"], i as u64 + 2);
            } else {
                assert_eq!(body["isFinal"], true);
                assert_eq!(body["reply"], "- Start with the report\n- Take a walk");
            }
        }

        let plan_prompt = generator.last_prompt().user;
        assert!(plan_prompt.contains("Mood: answer 0"));
        assert!(plan_prompt.contains("Focus mode: answer 7"));

        // The terminal turn removed the cursor: the same id starts over.
        let restarted: Value =
            test::call_and_read_body_json(&app, next(json!({ "sessionId": "q-2", "message": "again" })).to_request())
                .await;
        assert_eq!(restarted["step"], 1);
        assert_eq!(restarted["isFinal"], false);
        let stored = storage.load_or_create_state("q-2", FlowMode::Guided).await.unwrap();
        assert!(stored.answers.is_empty());
    }

    #[actix_web::test]
    async fn missing_session_id_is_bad_request() {
        let (state, _) = test_state(ScriptedGenerator::new());
        let app = test_app!(state);
        let resp = test::call_service(&app, next(json!({ "message": "hi" })).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Missing session ID");
    }

    #[actix_web::test]
    async fn failed_generation_does_not_advance() {
        let generator = ScriptedGenerator::new();
        generator.push_failure("timeout");
        let (state, storage) = test_state(generator);
        let app = test_app!(state);

        let resp = test::call_service(
            &app,
            next(json!({ "sessionId": "q-3", "message": "x", "clientId": "c-1" })).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(storage.list_messages("q-3").await.unwrap().is_empty());

        let stored = storage.load_or_create_state("q-3", FlowMode::Guided).await.unwrap();
        assert_eq!(stored.step, 0);
    }

    #[actix_web::test]
    async fn transcript_is_logged_for_known_clients() {
        let generator = ScriptedGenerator::new();
        generator.push_reply("How are you feeling today?");
        let (state, storage) = test_state(generator);
        let app = test_app!(state);

        test::call_service(
            &app,
            next(json!({ "sessionId": "q-4", "message": "hello", "clientId": "c-1" })).to_request(),
        )
        .await;
        let log = storage.list_messages("q-4").await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].content, "How are you feeling today?");
    }

    #[actix_web::test]
    async fn open_mode_finishes_when_tasks_appear() {
        let generator = ScriptedGenerator::new();
        generator.push_reply("What do you need to get done today?");
        generator.push_reply(
            "Great plan!\n```json\n[{\"task\":\"Draft proposal\",\"estimatedTime\":\"2 hours\"}]\n```",
        );
        let (state, storage) = test_state(generator.clone());
        let app = test_app!(state);

        let first: Value = test::call_and_read_body_json(
            &app,
            next(json!({ "sessionId": "o-1", "message": "hey", "clientId": "c-1", "mode": "open" })).to_request(),
        )
        .await;
        assert_eq!(first["isFinal"], false);

        let second: Value = test::call_and_read_body_json(
            &app,
            next(json!({ "sessionId": "o-1", "message": "a proposal", "clientId": "c-1" })).to_request(),
        )
        .await;
        assert_eq!(second["isFinal"], true);
        assert_eq!(second["tasks"][0]["estimatedMinutes"], 120);

        let transcript = generator.last_prompt().user;
        assert!(transcript.contains("User: hey"));
        assert!(transcript.contains("Assistant: What do you need to get done today?"));
        assert!(transcript.contains("User: a proposal"));

        let tasks = storage.list_tasks("c-1").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].session_id.as_deref(), Some("o-1"));
        assert!(storage.get_session("o-1").await.unwrap().unwrap().is_finished);
    }

    #[actix_web::test]
    async fn open_mode_stops_at_turn_cap() {
        let (state, _) = test_state(ScriptedGenerator::new());
        let app = test_app!(state);

        let mut last = Value::Null;
        for _ in 0..MAX_OPEN_TURNS {
            last = test::call_and_read_body_json(
                &app,
                next(json!({ "sessionId": "o-2", "message": "hmm", "mode": "open" })).to_request(),
            )
            .await;
        }
        assert_eq!(last["isFinal"], true);
        assert_eq!(last["step"], MAX_OPEN_TURNS);
    }
}
