//! Prompt composition for initial and refinement attempts.
//!
//! Composition is a pure function of the task and the refinement context:
//! identical inputs render byte-identical prompts, with examples serialized in
//! their stored order.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::attempt::Refinement;
use crate::core::task::Task;

const INITIAL_TEMPLATE: &str = include_str!("prompts/initial.md");
const REFINEMENT_TEMPLATE: &str = include_str!("prompts/refinement.md");

/// Default number of evaluation examples shown to the generator.
pub const DEFAULT_EVAL_EXAMPLES: usize = 3;

/// Renders generation prompts from compiled-in templates.
pub struct PromptComposer {
    env: Environment<'static>,
    entry_point: String,
    eval_examples: usize,
}

impl PromptComposer {
    pub fn new(entry_point: impl Into<String>, eval_examples: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("initial", INITIAL_TEMPLATE)
            .context("compile initial prompt template")?;
        env.add_template("refinement", REFINEMENT_TEMPLATE)
            .context("compile refinement prompt template")?;
        Ok(Self {
            env,
            entry_point: entry_point.into(),
            eval_examples,
        })
    }

    /// Compose the prompt for the next attempt.
    ///
    /// Without a refinement context this is the initial prompt; with one, the
    /// previous candidate and its rendered feedback are quoted back.
    pub fn compose(&self, task: &Task, refinement: Option<&Refinement>) -> Result<String> {
        let train = to_pretty_json(task.train())?;
        let shown = task.eval().len().min(self.eval_examples);
        let eval = to_pretty_json(&task.eval()[..shown])?;

        let rendered = match refinement {
            None => self.env.get_template("initial")?.render(context! {
                train => train,
                eval => eval,
                entry_point => self.entry_point,
            })?,
            Some(refinement) => self.env.get_template("refinement")?.render(context! {
                previous_code => refinement.candidate.source,
                feedback => refinement.feedback.to_string(),
                train => train,
                eval => eval,
                entry_point => self.entry_point,
            })?,
        };
        Ok(rendered)
    }
}

fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("serialize prompt examples")
}
