//! The tool-calling decision protocol.
//!
//! Loads the fixed tool catalogue and decodes the oracle's selected tool
//! into a typed `AgentAction`. Decoding is deliberately forgiving: element
//! ids arrive as JSON numbers or numeric strings depending on the model,
//! and a missing tool call, unknown tool name or malformed argument object
//! all fall back to a `Wait` action with a descriptive reason instead of
//! surfacing a parse error into the loop.

use serde_json::Value;

use crate::agent::state::{AgentAction, PlanStep};
use crate::errors::{CasePilotError, CasePilotResult};
use crate::oracle::types::{Decision, ToolDef};

/// Tool catalogue embedded at compile time.
pub fn load_builtin_tools() -> CasePilotResult<Vec<ToolDef>> {
    let json = include_str!("../../prompts/tools/builtin.json");
    serde_json::from_str(json)
        .map_err(|e| CasePilotError::Config(format!("Failed to parse builtin tools: {e}")))
}

/// Element ids are accepted as integers or numeric strings.
fn parse_element_id(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().map(|v| v as u32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn str_arg(args: &Value, key: &str) -> String {
    args[key].as_str().unwrap_or("").to_string()
}

/// Decodes the oracle's decision into exactly one action.
pub fn decode_decision(decision: &Decision) -> AgentAction {
    if !decision.has_tool_call() {
        return AgentAction::Wait {
            reason: "the oracle returned no tool call; observing the screen again".into(),
        };
    }

    let args = &decision.raw_arguments;
    match decision.tool_name.as_str() {
        "click_element" => match parse_element_id(&args["elementId"]) {
            Some(element_id) => AgentAction::ClickElement {
                element_id,
                expected_outcome: str_arg(args, "expectedOutcome"),
            },
            None => AgentAction::Wait {
                reason: format!(
                    "click_element arrived without a usable elementId ({})",
                    args["elementId"]
                ),
            },
        },
        "type_message" => {
            let text = str_arg(args, "text");
            if text.is_empty() {
                AgentAction::Wait {
                    reason: "type_message arrived without text".into(),
                }
            } else {
                AgentAction::TypeMessage {
                    text,
                    element_id: parse_element_id(&args["elementId"]),
                }
            }
        }
        "scroll_down" => AgentAction::ScrollDown {
            reason: str_arg(args, "reason"),
        },
        "scroll_up" => AgentAction::ScrollUp {
            reason: str_arg(args, "reason"),
        },
        "wait_for_response" => AgentAction::Wait {
            reason: str_arg(args, "reason"),
        },
        "upload_file" => AgentAction::UploadFile {
            file_description: str_arg(args, "fileDescription"),
        },
        "press_back" => AgentAction::PressBack {
            reason: str_arg(args, "reason"),
        },
        "request_human_review" => AgentAction::RequestHumanReview {
            reason: str_arg(args, "reason"),
            needs_input: args["needsInput"].as_bool().unwrap_or(false),
            input_prompt: args["inputPrompt"].as_str().map(str::to_string),
        },
        "mark_resolved" => AgentAction::MarkResolved {
            summary: str_arg(args, "summary"),
        },
        "update_plan" => {
            let steps = args["steps"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .map(|s| PlanStep {
                            step: s["step"].as_str().unwrap_or("").to_string(),
                            status: s["status"].as_str().unwrap_or("pending").to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            AgentAction::UpdatePlan {
                explanation: str_arg(args, "explanation"),
                steps,
            }
        }
        unknown => AgentAction::Wait {
            reason: format!("the oracle selected an unrecognized tool '{unknown}'"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(tool: &str, args: serde_json::Value) -> Decision {
        Decision {
            tool_call_id: "call_1".into(),
            tool_name: tool.into(),
            raw_arguments: args,
            reasoning: String::new(),
            content: String::new(),
        }
    }

    #[test]
    fn catalogue_loads_and_names_all_ten_tools() {
        let tools = load_builtin_tools().unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.function.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "click_element",
                "type_message",
                "scroll_down",
                "scroll_up",
                "wait_for_response",
                "upload_file",
                "press_back",
                "request_human_review",
                "mark_resolved",
                "update_plan",
            ]
        );
    }

    #[test]
    fn element_id_accepts_numbers_and_numeric_strings() {
        let as_number = decode_decision(&decision(
            "click_element",
            serde_json::json!({"elementId": 7, "expectedOutcome": "opens help"}),
        ));
        let as_string = decode_decision(&decision(
            "click_element",
            serde_json::json!({"elementId": "7", "expectedOutcome": "opens help"}),
        ));
        assert_eq!(as_number, as_string);
        assert!(matches!(
            as_number,
            AgentAction::ClickElement { element_id: 7, .. }
        ));
    }

    #[test]
    fn unknown_tool_falls_back_to_wait() {
        let action = decode_decision(&decision("launch_rocket", serde_json::json!({})));
        match action {
            AgentAction::Wait { reason } => assert!(reason.contains("launch_rocket")),
            other => panic!("expected Wait, got {other:?}"),
        }
    }

    #[test]
    fn missing_tool_call_falls_back_to_wait() {
        let d = Decision {
            tool_call_id: String::new(),
            tool_name: String::new(),
            raw_arguments: Value::Null,
            reasoning: "thinking out loud".into(),
            content: "I am not sure".into(),
        };
        assert!(matches!(decode_decision(&d), AgentAction::Wait { .. }));
    }

    #[test]
    fn unparseable_click_arguments_fall_back_to_wait() {
        let action = decode_decision(&decision(
            "click_element",
            serde_json::json!({"elementId": "the blue button"}),
        ));
        assert!(matches!(action, AgentAction::Wait { .. }));
    }

    #[test]
    fn update_plan_decodes_steps() {
        let action = decode_decision(&decision(
            "update_plan",
            serde_json::json!({
                "explanation": "support page found",
                "steps": [
                    {"step": "open chat", "status": "in_progress"},
                    {"step": "describe issue", "status": "pending"}
                ]
            }),
        ));
        match action {
            AgentAction::UpdatePlan { steps, .. } => assert_eq!(steps.len(), 2),
            other => panic!("expected UpdatePlan, got {other:?}"),
        }
    }
}
