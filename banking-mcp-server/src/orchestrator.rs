//! Orchestrator
//!
//! Submission creates the task and routes it synchronously; the agent call
//! runs on a spawned task that performs the single terminal write.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use banking_mcp_core::rules::TRANSFER_INTENTS;
use banking_mcp_core::{
    Agent, AgentType, Result, RoutingContext, Task, TaskAccepted, TaskRequest, TaskResultResponse,
    TaskStatus, TaskUpdate,
};
use banking_mcp_storage::{AgentRegistry, SessionStore, TaskManager};

use crate::dispatch::{AgentClient, AgentRequest, AgentResponse, DispatchError};
use crate::routing::ContextRouter;

pub struct Orchestrator {
    tasks: Arc<TaskManager>,
    sessions: Arc<SessionStore>,
    registry: Arc<AgentRegistry>,
    router: ContextRouter,
    client: Arc<dyn AgentClient>,
    permits: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        tasks: Arc<TaskManager>,
        sessions: Arc<SessionStore>,
        registry: Arc<AgentRegistry>,
        router: ContextRouter,
        client: Arc<dyn AgentClient>,
        max_concurrent_dispatches: usize,
    ) -> Self {
        Self {
            tasks,
            sessions,
            registry,
            router,
            client,
            permits: Arc::new(Semaphore::new(max_concurrent_dispatches.max(1))),
        }
    }

    /// Accept a task and start working on it.
    ///
    /// Only validation and lookup problems are returned as errors. A task
    /// nobody can take is recorded as REJECTED and still accepted here.
    pub async fn submit(self: &Arc<Self>, mut request: TaskRequest) -> Result<TaskAccepted> {
        request.validate()?;

        let session = self
            .sessions
            .get_or_create(request.session_id.as_deref(), &request.user_id, &request.channel)
            .await?;
        request.session_id = Some(session.session_id.clone());

        let task = self.tasks.create_task(request).await?;
        if let Err(err) = self.sessions.add_task(&session.session_id, &task.task_id).await {
            warn!(
                task_id = %task.task_id,
                session_id = %session.session_id,
                error = %err,
                "Failed to record task in session"
            );
        }

        let context = RoutingContext::from_task(&task, &session.context);
        match self.router.route(context).await {
            Ok(decision) => {
                let processing = self
                    .tasks
                    .update_task(&task.task_id, TaskUpdate::processing(decision))
                    .await?;
                self.spawn_dispatch(processing);
            }
            Err(err) => {
                warn!(task_id = %task.task_id, intent = %task.intent, error = %err, "Task rejected");
                self.tasks
                    .update_task(&task.task_id, TaskUpdate::rejected(err.to_string()))
                    .await?;
            }
        }

        Ok(TaskAccepted {
            task_id: task.task_id,
            session_id: session.session_id,
            status: TaskStatus::Pending,
        })
    }

    /// Current state of a task
    pub async fn get_result(&self, task_id: &str) -> Result<TaskResultResponse> {
        self.tasks.get_task(task_id).await.map(TaskResultResponse::from)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Accepted tasks that have not reached a terminal status yet
    pub fn tasks_in_flight(&self) -> usize {
        self.tasks.count_by_status(TaskStatus::Pending) + self.tasks.count_by_status(TaskStatus::Processing)
    }

    fn spawn_dispatch(self: &Arc<Self>, task: Task) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let update = match this.permits.clone().acquire_owned().await {
                Ok(_permit) => this.execute(&task).await,
                Err(_) => TaskUpdate::failed("Dispatch queue closed"),
            };

            match this.tasks.update_task(&task.task_id, update).await {
                Ok(done) => info!(
                    task_id = %done.task_id,
                    status = %done.status,
                    duration_ms = done.duration_ms(),
                    "Task finished"
                ),
                Err(err) => error!(task_id = %task.task_id, error = %err, "Failed to record task outcome"),
            }
        })
    }

    /// Call the assigned agent and turn the reply into the terminal update
    async fn execute(&self, task: &Task) -> TaskUpdate {
        let Some(agent_id) = task.agent_id.as_deref() else {
            return TaskUpdate::failed("Task has no assigned agent");
        };
        let agent = match self.registry.get(agent_id).await {
            Ok(agent) => agent,
            Err(err) => return TaskUpdate::failed(format!("Agent not found: {err}")),
        };

        let request = AgentRequest::for_task(task);
        match self.client.dispatch(&agent, &request).await {
            Ok(response) if needs_execution(task, &agent) && response.approves() => {
                self.execute_approved_transfer(task, &request, response).await
            }
            Ok(response) => completed(response),
            Err(err) => {
                error!(
                    task_id = %task.task_id,
                    agent_id = %agent.agent_id,
                    timed_out = err.is_timeout(),
                    error = %err,
                    "Agent dispatch failed"
                );
                failed(err, None)
            }
        }
    }

    /// Hand a guardrail-approved transfer to the first healthy BANKING agent
    async fn execute_approved_transfer(
        &self,
        task: &Task,
        request: &AgentRequest,
        approval: AgentResponse,
    ) -> TaskUpdate {
        let executors = self
            .registry
            .find_by_type(&AgentType::new(AgentType::BANKING))
            .await;
        let Some(executor) = executors.first() else {
            error!(task_id = %task.task_id, "No banking agent available to execute approved transfer");
            return completed(approval);
        };

        info!(
            task_id = %task.task_id,
            banking_agent = %executor.agent_id,
            "Guardrail approved, chaining to banking agent"
        );
        match self.client.dispatch(executor, request).await {
            Ok(response) => completed(response),
            Err(err) => {
                error!(task_id = %task.task_id, agent_id = %executor.agent_id, error = %err, "Banking agent failed after guardrail approval");
                failed(err, Some("Guardrail approved but banking agent failed"))
            }
        }
    }
}

fn needs_execution(task: &Task, agent: &Agent) -> bool {
    agent.agent_type.as_str() == AgentType::GUARDRAIL && TRANSFER_INTENTS.contains(&task.intent.as_str())
}

fn completed(response: AgentResponse) -> TaskUpdate {
    TaskUpdate {
        status: Some(TaskStatus::Completed),
        result: response.result,
        risk_score: response.risk_score,
        explanation: response.explanation,
        ..Default::default()
    }
}

fn failed(err: DispatchError, prefix: Option<&str>) -> TaskUpdate {
    let message = match prefix {
        Some(prefix) => format!("{prefix}: {err}"),
        None => err.to_string(),
    };
    match err {
        DispatchError::Rejected {
            explanation,
            result,
            risk_score,
            ..
        } => TaskUpdate {
            status: Some(TaskStatus::Failed),
            error: Some(message),
            result,
            risk_score,
            explanation,
            ..Default::default()
        },
        _ => TaskUpdate::failed(message),
    }
}
