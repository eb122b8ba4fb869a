//! Integration-level parser coverage: realistic multi-field model turns
//! exercised through the public API, complementing the in-module unit
//! tests that check individual fields in isolation.

use agentcore::{Action, ParseError};

#[test]
fn realistic_tool_turn_with_thought_and_trailing_prose() {
    let text = "\
Thought: I need the current weather for the user's city before I can answer.
Action: tool
Tool: get_weather
Arguments: {\"city\": \"Shanghai\", \"units\": \"metric\"}
";
    let action = agentcore::parser::parse(text).unwrap();
    match action {
        Action::Tool { name, arguments, thought } => {
            assert_eq!(name, "get_weather");
            assert_eq!(arguments["units"], "metric");
            assert!(thought.unwrap().contains("weather"));
        }
        other => panic!("expected Tool, got {other:?}"),
    }
}

#[test]
fn launch_subagents_round_trips_through_the_action_enum() {
    let text = "Action: launch_subagents\nAgents: [\"researcher\", \"coder\"]\nTasks: [\"find the library\", \"wire it up\"]\n";
    let action = agentcore::parser::parse(text).unwrap();
    let Action::LaunchSubagents { specs, .. } = action else {
        panic!("expected LaunchSubagents");
    };
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[0].subagent_name, "researcher");
    assert_eq!(specs[1].subagent_name, "coder");
}

#[test]
fn feedback_message_is_safe_to_replay_as_a_tool_turn() {
    let err = agentcore::parser::parse("no action here").unwrap_err();
    assert!(matches!(err, ParseError::MissingAction));
    let feedback = err.feedback();
    assert!(feedback.contains("could not be parsed"));
    // Re-parsing the feedback itself must not panic or succeed by accident.
    assert!(agentcore::parser::parse(&feedback).is_err());
}
