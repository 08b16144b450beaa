use docket_agent::AgentSpec;
use docket_core::{ContextKey, DocketError, Task, Value};
use std::collections::BTreeMap;

/// Id of the database step in [`matter_query_pipeline`] and
/// [`matter_chat_pipeline`]. Callers bind it to a deterministic SQL runner
/// rather than a model-backed agent.
pub const SQL_RUNNER_AGENT: &str = "sql_runner";

/// Name of the tool the SQL runner executes through.
pub const MATTER_QUERY_TOOL: &str = "matter_query";

/// A ready-made pipeline: agent definitions, tasks and the run inputs the
/// tasks expect.
#[derive(Debug, Clone)]
pub struct PipelineProfile {
    /// Agents the tasks are assigned to.
    pub agents: Vec<AgentSpec>,
    /// Tasks of the pipeline.
    pub tasks: Vec<Task>,
    /// Run inputs that must be supplied.
    pub inputs: Vec<ContextKey>,
}

impl PipelineProfile {
    /// Fails with [`DocketError::Config`] naming every required input that
    /// `provided` lacks.
    pub fn check_inputs(
        &self,
        provided: &BTreeMap<ContextKey, Value>,
    ) -> Result<(), DocketError> {
        let missing: Vec<&str> = self
            .inputs
            .iter()
            .filter(|key| !provided.contains_key(*key))
            .map(ContextKey::as_str)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(DocketError::Config(format!(
            "missing run input(s): {}",
            missing.join(", ")
        )))
    }
}

/// Research, then draft, then review a matter summary.
pub fn legal_research_pipeline() -> PipelineProfile {
    let agents = vec![
        AgentSpec::new("researcher", "Legal Researcher", RESEARCHER_PROMPT),
        AgentSpec::new("drafter", "Legal Drafter", DRAFTER_PROMPT),
        AgentSpec::new("reviewer", "Legal Reviewer", REVIEWER_PROMPT).with_max_retries(1),
    ];

    let tasks = vec![
        Task::new("research", "researcher")
            .with_description(
                "Research the legal issues raised by the matter summary. List the governing \
                 law, relevant authorities and open factual questions.",
            )
            .reads(["matter_summary"])
            .writes(["research_notes"]),
        Task::new("draft", "drafter")
            .with_description(
                "Draft a client memorandum for the matter using the research notes. \
                 Cite only authorities that appear in the notes.",
            )
            .reads(["matter_summary", "research_notes"])
            .writes(["draft_document"])
            .after(["research"]),
        Task::new("review", "reviewer")
            .with_description(
                "Review the draft against the research notes. Flag unsupported claims, \
                 missing issues and citation problems, then give an overall recommendation.",
            )
            .reads(["draft_document", "research_notes"])
            .writes(["review_notes"])
            .after(["draft"]),
    ];

    PipelineProfile {
        agents,
        tasks,
        inputs: vec![ContextKey::from("matter_summary")],
    }
}

/// Answer a natural-language question about the matters database:
/// generate SQL, run it, analyze the rows.
pub fn matter_query_pipeline() -> PipelineProfile {
    let agents = vec![
        AgentSpec::new("sql_generator", "SQL Query Generator", SQL_GENERATOR_PROMPT),
        AgentSpec::new(
            SQL_RUNNER_AGENT,
            "SQL Runner",
            "Execute the generated query against the matters database.",
        )
        .with_tools([MATTER_QUERY_TOOL])
        .with_max_retries(1),
        AgentSpec::new("data_analyst", "Legal Data Analyst", DATA_ANALYST_PROMPT),
    ];

    let tasks = vec![
        Task::new("generate_sql", "sql_generator")
            .with_description(SQL_TASK)
            .reads(["question"])
            .writes(["sql_query"]),
        Task::new("run_query", SQL_RUNNER_AGENT)
            .with_description("Execute the generated SQL.")
            .reads(["sql_query"])
            .writes(["query_results", "executed_sql"])
            .after(["generate_sql"]),
        Task::new("analyze", "data_analyst")
            .with_description(ANALYSIS_TASK)
            .reads(["question", "executed_sql", "query_results"])
            .writes(["answer"])
            .after(["run_query"]),
    ];

    PipelineProfile {
        agents,
        tasks,
        inputs: vec![ContextKey::from("question")],
    }
}

/// One turn of a conversation about the matters database: decide whether the
/// message needs a query, run it if so, reply in a sentence or three.
///
/// `history` holds the recent exchanges as plain text and may be empty.
pub fn matter_chat_pipeline() -> PipelineProfile {
    let agents = vec![
        AgentSpec::new("sql_generator", "SQL Query Generator", SQL_GENERATOR_PROMPT),
        AgentSpec::new(
            SQL_RUNNER_AGENT,
            "SQL Runner",
            "Execute the generated query against the matters database.",
        )
        .with_tools([MATTER_QUERY_TOOL])
        .with_max_retries(1),
        AgentSpec::new("chat_assistant", "Legal Database Chat Assistant", CHAT_ASSISTANT_PROMPT),
    ];

    let tasks = vec![
        Task::new("plan_query", "sql_generator")
            .with_description(CHAT_SQL_TASK)
            .reads(["message", "history"])
            .writes(["sql_query"]),
        Task::new("run_query", SQL_RUNNER_AGENT)
            .with_description("Execute the generated SQL, if any.")
            .reads(["sql_query"])
            .writes(["query_results", "executed_sql"])
            .after(["plan_query"]),
        Task::new("reply", "chat_assistant")
            .with_description(CHAT_REPLY_TASK)
            .reads(["message", "history", "executed_sql", "query_results"])
            .writes(["reply"])
            .after(["run_query"]),
    ];

    PipelineProfile {
        agents,
        tasks,
        inputs: vec![ContextKey::from("history"), ContextKey::from("message")],
    }
}

const RESEARCHER_PROMPT: &str = r#"You are a legal researcher at a litigation firm.
You identify the legal issues in a matter, the law that governs them and the
authorities a court would look at. You separate settled law from open questions
and never invent citations. If the facts are insufficient, say what is missing."#;

const DRAFTER_PROMPT: &str = r#"You are a legal drafter.
You turn research notes into a clear, well-organised client memorandum:
question presented, short answer, facts, discussion, recommendation.
Use only the authorities in the research notes. Write plainly."#;

const REVIEWER_PROMPT: &str = r#"You are a senior reviewing attorney.
You check drafts for accuracy against the research, unsupported statements,
missing issues and citation errors. Be specific: quote the passage you are
commenting on and say what should change."#;

const SQL_GENERATOR_PROMPT: &str = r#"You are an SQL developer who specialises in legal
practice databases. You understand legal terminology and translate business
questions into precise SQLite queries. Return only the SQL query."#;

const DATA_ANALYST_PROMPT: &str = r#"You are a legal data analyst. You give short, direct
answers about database results: lead with the answer, use the exact numbers from
the results, add at most one or two brief insights."#;

const SQL_TASK: &str = r#"Convert the question into one SQLite query over the table `matters`.

Columns: Id, Display_Name, Client_Name, Client_Full_Name, Record_Type_Name, Case_Type,
Status, Case_Stage, Open_Date, Closed_Date, Attorney_Name, Assistant_Name.

Common values:
- Record_Type_Name: 'Personal Injury', 'Billable Matter', 'Workers Compensation'
- Status: 'Closed', 'Active', 'Open'
- Case_Stage: 'Active', 'Closed', 'Pre-Lit Settlement'
- Dates are M/D/YY text, e.g. '7/21/23'; match a year with LIKE '%23'

Use COUNT(*) for counts, GROUP BY for breakdowns, ORDER BY ... DESC LIMIT N for
"top" questions, and `column != ''` to exclude empty values.

Return only the SQL query, no explanation."#;

const ANALYSIS_TASK: &str = r#"Answer the question from the query results in two to four
sentences. Start with the direct answer, use exact numbers, then give one key insight.
The system tracks personal injury and workers compensation matters, their stages,
attorney assignments and clients."#;

const CHAT_ASSISTANT_PROMPT: &str = r#"You are a legal database assistant who gives quick,
direct answers about the firm's matters: personal injury and workers compensation
cases, attorneys and their caseloads, case stages, clients and dates.
Keep every answer to one to three sentences and use the exact numbers you are given."#;

const CHAT_SQL_TASK: &str = r#"Decide whether the message asks about the matters database.

If it does, return only one SQLite query over the table `matters`.
Columns: Id, Display_Name, Client_Name, Client_Full_Name, Record_Type_Name, Case_Type,
Status, Case_Stage, Open_Date, Closed_Date, Attorney_Name, Assistant_Name.

If it does not (a greeting, general advice), return exactly: NO_QUERY_NEEDED

Examples:
- "How many cases?" -> SELECT COUNT(*) FROM matters
- "Who handles most cases?" -> SELECT Attorney_Name, COUNT(*) FROM matters WHERE Attorney_Name != '' GROUP BY Attorney_Name ORDER BY COUNT(*) DESC LIMIT 1
- "Hello" -> NO_QUERY_NEEDED"#;

const CHAT_REPLY_TASK: &str = r#"Reply to the message in a short, direct, conversational way.

Use the recent conversation for context. If query results are present, answer
from them with exact numbers; an empty executed query means none was needed.
For greetings or general questions, reply briefly and ask how you can help with
the firm's matters. One to three sentences."#;
