//! Test-only fakes and fixtures: scripted generator and sandbox, in-memory
//! task source, solution store and run log.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::core::grid::{Grid, RawRows};
use crate::core::task::{EvalExample, Example, Task, TaskId};
use crate::io::generation::{GenerationRequest, ServiceError, TextGenerator};
use crate::io::progress_log::{ProgressRecord, ProgressSink};
use crate::io::sandbox::{CallOutcome, EntryPoint, LoadError, Sandbox, SyntaxCheck};
use crate::io::solution_store::SolutionStore;
use crate::io::task_source::TaskSource;

/// Build a grid from literal rows.
pub fn grid(rows: &[&[i64]]) -> Grid {
    Grid::from_rows(rows.iter().map(|row| row.to_vec()).collect()).expect("valid grid")
}

pub fn example(input: &[&[i64]], output: &[&[i64]]) -> Example {
    Example {
        input: grid(input),
        output: grid(output),
    }
}

fn task_id(id: u32) -> TaskId {
    TaskId::new(id).expect("positive task id")
}

/// One training pair solved by reversing row order.
pub fn reverse_rows_task(id: u32) -> Task {
    Task::new(
        task_id(id),
        vec![example(&[&[0, 1], &[1, 0]], &[&[1, 0], &[0, 1]])],
        vec![EvalExample {
            input: grid(&[&[2, 0], &[0, 0]]),
            output: None,
        }],
    )
    .expect("task")
}

/// Three training pairs solved by transposition; the second has a single row.
pub fn transpose_task(id: u32) -> Task {
    Task::new(
        task_id(id),
        vec![
            example(&[&[1, 2], &[3, 4]], &[&[1, 3], &[2, 4]]),
            example(&[&[1, 2, 3]], &[&[1], &[2], &[3]]),
            example(&[&[5, 0], &[0, 5], &[7, 7]], &[&[5, 0, 7], &[0, 5, 7]]),
        ],
        vec![EvalExample {
            input: grid(&[&[1, 2], &[3, 4], &[5, 6]]),
            output: None,
        }],
    )
    .expect("task")
}

/// Identity-style task with `train` training pairs and `eval` unlabeled
/// evaluation inputs.
pub fn task_with_eval(train: usize, eval: usize) -> Task {
    let cell = |n: usize| (n % 10) as i64;
    let train = (0..train)
        .map(|n| example(&[&[cell(n)]], &[&[cell(n)]]))
        .collect();
    let eval = (0..eval)
        .map(|n| EvalExample {
            input: grid(&[&[cell(n), cell(n + 1)]]),
            output: None,
        })
        .collect();
    Task::new(task_id(1), train, eval).expect("task")
}

/// Generator that replays scripted replies and records every request.
pub struct ScriptedGenerator {
    replies: RefCell<VecDeque<Result<String, ServiceError>>>,
    requests: RefCell<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Result<String, ServiceError>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.borrow().clone()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        self.requests.borrow_mut().push(request.clone());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::Transport("script exhausted".to_string())))
    }
}

type Behavior = Rc<dyn Fn(&Grid) -> CallOutcome>;

/// How a scripted candidate behaves in the sandbox.
#[derive(Clone)]
pub enum ScriptedProgram {
    SyntaxError(String),
    Missing(String),
    ModuleFault(String),
    Runs(Behavior),
}

impl ScriptedProgram {
    pub fn run(behavior: impl Fn(&Grid) -> CallOutcome + 'static) -> Self {
        ScriptedProgram::Runs(Rc::new(behavior))
    }

    pub fn reverse_rows() -> Self {
        Self::run(|grid| {
            let mut rows = RawRows::from(grid.clone());
            rows.reverse();
            CallOutcome::Returned(rows)
        })
    }

    pub fn transpose_outcome(grid: &Grid) -> CallOutcome {
        let shape = grid.shape();
        let rows = (0..shape.width)
            .map(|c| {
                grid.rows()
                    .iter()
                    .map(|row| i64::from(row[c]))
                    .collect()
            })
            .collect();
        CallOutcome::Returned(rows)
    }
}

/// Sandbox keyed by exact source text. Unknown sources parse but have no
/// entry point.
#[derive(Default)]
pub struct ScriptedSandbox {
    programs: HashMap<String, ScriptedProgram>,
    syntax_checks: Cell<usize>,
    loads: Cell<usize>,
    calls: Rc<Cell<usize>>,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: &str, program: ScriptedProgram) -> Self {
        self.programs.insert(source.to_string(), program);
        self
    }

    pub fn syntax_checks(&self) -> usize {
        self.syntax_checks.get()
    }

    pub fn loads(&self) -> usize {
        self.loads.get()
    }

    /// Entry-point invocations across all loaded candidates.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

pub struct ScriptedEntry {
    behavior: Behavior,
    calls: Rc<Cell<usize>>,
}

impl EntryPoint for ScriptedEntry {
    fn call(&self, input: &Grid) -> Result<CallOutcome> {
        self.calls.set(self.calls.get() + 1);
        Ok((self.behavior)(input))
    }
}

impl Sandbox for ScriptedSandbox {
    type Entry = ScriptedEntry;

    fn check_syntax(&self, source: &str) -> Result<SyntaxCheck> {
        self.syntax_checks.set(self.syntax_checks.get() + 1);
        Ok(match self.programs.get(source) {
            Some(ScriptedProgram::SyntaxError(message)) => SyntaxCheck::Invalid(message.clone()),
            _ => SyntaxCheck::Valid,
        })
    }

    fn load_entry_point(&self, source: &str) -> Result<ScriptedEntry, LoadError> {
        self.loads.set(self.loads.get() + 1);
        match self.programs.get(source) {
            Some(ScriptedProgram::Runs(behavior)) => Ok(ScriptedEntry {
                behavior: Rc::clone(behavior),
                calls: Rc::clone(&self.calls),
            }),
            Some(ScriptedProgram::ModuleFault(message)) => {
                Err(LoadError::ModuleFault(message.clone()))
            }
            Some(ScriptedProgram::Missing(message)) => Err(LoadError::Missing(message.clone())),
            Some(ScriptedProgram::SyntaxError(_)) | None => {
                Err(LoadError::Missing("function p() not found".to_string()))
            }
        }
    }
}

/// In-memory task source; ids registered as broken fail to load.
#[derive(Default)]
pub struct MemoryTaskSource {
    tasks: BTreeMap<TaskId, Task>,
    broken: BTreeSet<TaskId>,
}

impl MemoryTaskSource {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: tasks.into_iter().map(|task| (task.id(), task)).collect(),
            broken: BTreeSet::new(),
        }
    }

    pub fn with_broken(mut self, id: u32) -> Self {
        self.broken.insert(task_id(id));
        self
    }
}

impl TaskSource for MemoryTaskSource {
    fn task_ids(&self) -> Vec<TaskId> {
        let ids: BTreeSet<TaskId> = self.tasks.keys().chain(&self.broken).copied().collect();
        ids.into_iter().collect()
    }

    fn load(&self, id: TaskId) -> Result<Task> {
        if self.broken.contains(&id) {
            return Err(anyhow!("task {id} is unreadable"));
        }
        self.tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow!("task {id} not found"))
    }
}

/// In-memory solution store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    solutions: BTreeMap<TaskId, String>,
    failed: Vec<(TaskId, u32, String)>,
}

impl MemoryStore {
    pub fn with_solution(mut self, id: u32, source: &str) -> Self {
        self.solutions.insert(task_id(id), source.to_string());
        self
    }

    pub fn solution(&self, id: TaskId) -> Option<&str> {
        self.solutions.get(&id).map(String::as_str)
    }

    pub fn failed_attempts(&self) -> Vec<(TaskId, u32)> {
        self.failed
            .iter()
            .map(|(id, attempt, _)| (*id, *attempt))
            .collect()
    }
}

impl SolutionStore for MemoryStore {
    fn exists(&self, id: TaskId) -> bool {
        self.solutions.contains_key(&id)
    }

    fn save(&mut self, id: TaskId, source: &str) -> Result<()> {
        self.solutions.insert(id, source.to_string());
        Ok(())
    }

    fn save_failed(&mut self, id: TaskId, attempt: u32, source: &str) -> Result<()> {
        self.failed.push((id, attempt, source.to_string()));
        Ok(())
    }
}

/// In-memory run log.
#[derive(Debug, Default)]
pub struct MemoryLog {
    pub rows: Vec<ProgressRecord>,
}

impl ProgressSink for MemoryLog {
    fn append(&mut self, record: &ProgressRecord) -> Result<()> {
        self.rows.push(record.clone());
        Ok(())
    }
}
