//! Action gating by system state.
//!
//! Every schedule action type maps to a category; each system state lists
//! the categories it skips and the ones it boosts. Skip always wins over
//! boost, and the healthy state contributes nothing.

use serde::Serialize;

use crate::system_state::SystemState;

/// The coarse category a scheduled action falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    FeatureWork,
    Review,
    Maintenance,
    Communication,
    Lightweight,
}

/// The mapping from action type to category.
pub fn category_for_action(action_type: &str) -> ActionCategory {
    match action_type {
        "implement_feature" | "write_code" | "refactor_module" | "continue_task" => {
            ActionCategory::FeatureWork
        }
        "review_pr" | "code_review" | "triage_issues" => ActionCategory::Review,
        "update_dependencies" | "cleanup_workspace" | "run_backups" | "prune_logs" => {
            ActionCategory::Maintenance
        }
        "send_report" | "post_standup" | "notify_channel" => ActionCategory::Communication,
        "health_check" | "collect_metrics" | "sync_status" => ActionCategory::Lightweight,
        _ => ActionCategory::Lightweight,
    }
}

/// What a state does to each category.
#[derive(Debug, Clone, Copy)]
pub struct PriorityRule {
    pub skip: &'static [ActionCategory],
    pub boost: &'static [ActionCategory],
}

const NO_CATEGORIES: &[ActionCategory] = &[];

/// Per-state gating rules.
pub fn rules_for(state: SystemState) -> PriorityRule {
    match state {
        // Healthy contributes no skips or boosts.
        SystemState::Healthy => PriorityRule {
            skip: NO_CATEGORIES,
            boost: NO_CATEGORIES,
        },
        // Broken CI: hold new feature work, push review and fixes.
        SystemState::CiBroken => PriorityRule {
            skip: &[ActionCategory::FeatureWork],
            boost: &[ActionCategory::Review, ActionCategory::Maintenance],
        },
        // Degraded server: only light work should touch it.
        SystemState::ServerDegraded => PriorityRule {
            skip: &[ActionCategory::FeatureWork, ActionCategory::Review],
            boost: &[ActionCategory::Lightweight],
        },
        // Open P0: everything but the incident can wait.
        SystemState::P0Open => PriorityRule {
            skip: &[ActionCategory::Maintenance, ActionCategory::Communication],
            boost: &[ActionCategory::Review, ActionCategory::FeatureWork],
        },
        // Disk pressure: stop producing artifacts, start cleaning.
        SystemState::DiskPressure => PriorityRule {
            skip: &[ActionCategory::FeatureWork],
            boost: &[ActionCategory::Maintenance],
        },
    }
}

/// The gate's verdict for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionDecision {
    Run,
    Skip,
    Boost,
}

/// Decide what happens to `action_type` under the given active states.
pub fn evaluate_action(action_type: &str, states: &[SystemState]) -> ActionDecision {
    let category = category_for_action(action_type);

    if states
        .iter()
        .any(|s| rules_for(*s).skip.contains(&category))
    {
        return ActionDecision::Skip;
    }
    if states
        .iter()
        .any(|s| rules_for(*s).boost.contains(&category))
    {
        return ActionDecision::Boost;
    }
    ActionDecision::Run
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_actions_map_to_categories() {
        assert_eq!(
            category_for_action("implement_feature"),
            ActionCategory::FeatureWork
        );
        assert_eq!(category_for_action("review_pr"), ActionCategory::Review);
        assert_eq!(
            category_for_action("update_dependencies"),
            ActionCategory::Maintenance
        );
        assert_eq!(
            category_for_action("send_report"),
            ActionCategory::Communication
        );
        assert_eq!(
            category_for_action("health_check"),
            ActionCategory::Lightweight
        );
        assert_eq!(
            category_for_action("unknown_action"),
            ActionCategory::Lightweight
        );
    }

    #[test]
    fn healthy_state_runs_everything() {
        for action in ["implement_feature", "review_pr", "send_report"] {
            assert_eq!(
                evaluate_action(action, &[SystemState::Healthy]),
                ActionDecision::Run,
                "{action}"
            );
        }
    }

    #[test]
    fn ci_broken_skips_feature_work_and_boosts_review() {
        let states = [SystemState::CiBroken];
        assert_eq!(evaluate_action("implement_feature", &states), ActionDecision::Skip);
        assert_eq!(evaluate_action("review_pr", &states), ActionDecision::Boost);
        assert_eq!(evaluate_action("send_report", &states), ActionDecision::Run);
    }

    #[test]
    fn skip_wins_over_boost_across_states() {
        // P0 boosts feature work, disk pressure skips it.
        let states = [SystemState::P0Open, SystemState::DiskPressure];
        assert_eq!(
            evaluate_action("implement_feature", &states),
            ActionDecision::Skip
        );
        // Maintenance: skipped by P0, boosted by disk pressure — skip wins.
        assert_eq!(
            evaluate_action("update_dependencies", &states),
            ActionDecision::Skip
        );
    }

    #[test]
    fn healthy_alongside_other_states_contributes_nothing() {
        let states = [SystemState::Healthy, SystemState::CiBroken];
        assert_eq!(
            evaluate_action("implement_feature", &states),
            ActionDecision::Skip
        );
        assert_eq!(evaluate_action("review_pr", &states), ActionDecision::Boost);
    }

    #[test]
    fn no_states_means_run() {
        assert_eq!(evaluate_action("implement_feature", &[]), ActionDecision::Run);
    }
}
