//! Durable entity storage
//!
//! One YAML file per entity under the configured data directory with a
//! sibling JSON index per collection for cheap enumeration. Writes go
//! through a temp-file-then-rename so a reader never observes a torn file.
//! Every mutation holds a per-entity lock; cascading deletes take locks in
//! project -> epic -> task -> dependency order.

use crate::agent::Agent;
use crate::graph::GraphSnapshot;
use crate::types::{AtomicTask, Dependency, Epic, Project, TaskPriority, TaskStatus};
use crate::workflow::Workflow;
use crate::EngineError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

const INDEX_VERSION: u32 = 1;

/// Summary row kept in a collection index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Authoritative listing for one entity collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionIndex {
    pub entities: Vec<IndexEntry>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
    pub version: u32,
}

impl CollectionIndex {
    fn empty() -> Self {
        Self {
            entities: Vec::new(),
            last_updated: Utc::now(),
            version: INDEX_VERSION,
        }
    }

    fn upsert(&mut self, entry: IndexEntry) {
        match self.entities.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.entities.push(entry),
        }
        self.last_updated = Utc::now();
    }

    fn remove(&mut self, id: &str) {
        self.entities.retain(|e| e.id != id);
        self.last_updated = Utc::now();
    }
}

/// File-per-entity store for projects, epics, tasks, and dependencies.
pub struct EntityStore {
    data_dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EntityStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            locks: DashMap::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Ensure the directory tree and empty indexes exist. Safe to call any
    /// number of times.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        for dir in [
            "projects",
            "epics",
            "tasks",
            "dependencies",
            "dependency-graphs",
            "orchestration/agents",
            "orchestration/workflows",
            "orchestration/executions",
            "orchestration/schedules",
            "orchestration/logs",
        ] {
            tokio::fs::create_dir_all(self.data_dir.join(dir))
                .await
                .map_err(|e| EngineError::System(format!("creating {dir}: {e}")))?;
        }

        for index in [
            "projects-index.json",
            "epics-index.json",
            "tasks-index.json",
            "dependencies-index.json",
        ] {
            let path = self.data_dir.join(index);
            if !path.exists() {
                self.write_json(&path, &CollectionIndex::empty()).await?;
            }
        }

        tracing::debug!(data_dir = %self.data_dir.display(), "Entity store initialized");
        Ok(())
    }

    // ---- projects ------------------------------------------------------

    pub async fn create_project(&self, project: &Project) -> Result<(), EngineError> {
        let _guard = self.lock(&format!("project:{}", project.id)).await;
        self.create_entity("projects", &project.id, project, project_entry(project))
            .await
    }

    pub async fn get_project(&self, id: &str) -> Result<Project, EngineError> {
        self.read_entity("projects", id).await
    }

    pub async fn update_project(&self, project: &Project) -> Result<(), EngineError> {
        let _guard = self.lock(&format!("project:{}", project.id)).await;
        self.update_entity("projects", &project.id, project, project_entry(project))
            .await
    }

    pub async fn project_exists(&self, id: &str) -> bool {
        self.entity_path("projects", id).exists()
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, EngineError> {
        self.list_entities("projects").await
    }

    /// Case-insensitive substring search over name, description, and tags.
    pub async fn search_projects(&self, query: &str) -> Result<Vec<Project>, EngineError> {
        let needle = query.to_lowercase();
        let projects = self.list_projects().await?;
        Ok(projects
            .into_iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&needle)
                    || p.description.to_lowercase().contains(&needle)
                    || p.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .collect())
    }

    /// Delete a project and cascade to its epics, tasks, dependencies, and
    /// dependency graph, in that order.
    pub async fn delete_project(&self, id: &str) -> Result<(), EngineError> {
        let _project_guard = self.lock(&format!("project:{id}")).await;
        if !self.entity_path("projects", id).exists() {
            return Err(EngineError::NotFound(format!("project {id}")));
        }

        let epics: Vec<Epic> = self
            .list_entities::<Epic>("epics")
            .await?
            .into_iter()
            .filter(|e| e.project_id == id)
            .collect();
        let tasks: Vec<AtomicTask> = self
            .list_entities::<AtomicTask>("tasks")
            .await?
            .into_iter()
            .filter(|t| t.project_id == id)
            .collect();
        let task_ids: std::collections::HashSet<&str> =
            tasks.iter().map(|t| t.id.as_str()).collect();
        let dependencies: Vec<Dependency> = self
            .list_entities::<Dependency>("dependencies")
            .await?
            .into_iter()
            .filter(|d| {
                task_ids.contains(d.from_task.as_str()) || task_ids.contains(d.to_task.as_str())
            })
            .collect();

        for epic in &epics {
            let _guard = self.lock(&format!("epic:{}", epic.id)).await;
            self.delete_entity("epics", &epic.id).await?;
        }
        for task in &tasks {
            let _guard = self.lock(&format!("task:{}", task.id)).await;
            self.delete_entity("tasks", &task.id).await?;
        }
        for dep in &dependencies {
            let _guard = self.lock(&format!("dependency:{}", dep.id)).await;
            self.delete_entity("dependencies", &dep.id).await?;
        }

        let graph_path = self.data_dir.join("dependency-graphs").join(format!("{id}.json"));
        if graph_path.exists() {
            tokio::fs::remove_file(&graph_path)
                .await
                .map_err(|e| EngineError::System(format!("removing graph for {id}: {e}")))?;
        }

        self.delete_entity("projects", id).await?;

        tracing::info!(
            project_id = %id,
            epics = epics.len(),
            tasks = tasks.len(),
            dependencies = dependencies.len(),
            "Project deleted with cascade"
        );
        Ok(())
    }

    // ---- epics ---------------------------------------------------------

    pub async fn create_epic(&self, epic: &Epic) -> Result<(), EngineError> {
        let _guard = self.lock(&format!("epic:{}", epic.id)).await;
        self.create_entity("epics", &epic.id, epic, epic_entry(epic)).await
    }

    pub async fn get_epic(&self, id: &str) -> Result<Epic, EngineError> {
        self.read_entity("epics", id).await
    }

    pub async fn update_epic(&self, epic: &Epic) -> Result<(), EngineError> {
        let _guard = self.lock(&format!("epic:{}", epic.id)).await;
        self.update_entity("epics", &epic.id, epic, epic_entry(epic)).await
    }

    pub async fn epic_exists(&self, id: &str) -> bool {
        self.entity_path("epics", id).exists()
    }

    pub async fn list_epics(&self, project_id: Option<&str>) -> Result<Vec<Epic>, EngineError> {
        let epics = self.list_entities::<Epic>("epics").await?;
        Ok(match project_id {
            Some(pid) => epics.into_iter().filter(|e| e.project_id == pid).collect(),
            None => epics,
        })
    }

    pub async fn delete_epic(&self, id: &str) -> Result<(), EngineError> {
        let _guard = self.lock(&format!("epic:{id}")).await;
        self.delete_entity("epics", id).await
    }

    // ---- tasks ---------------------------------------------------------

    pub async fn create_task(&self, task: &AtomicTask) -> Result<(), EngineError> {
        let _guard = self.lock(&format!("task:{}", task.id)).await;
        self.create_entity("tasks", &task.id, task, task_entry(task)).await
    }

    pub async fn get_task(&self, id: &str) -> Result<AtomicTask, EngineError> {
        self.read_entity("tasks", id).await
    }

    pub async fn update_task(&self, task: &AtomicTask) -> Result<(), EngineError> {
        let _guard = self.lock(&format!("task:{}", task.id)).await;
        self.update_entity("tasks", &task.id, task, task_entry(task)).await
    }

    pub async fn task_exists(&self, id: &str) -> bool {
        self.entity_path("tasks", id).exists()
    }

    pub async fn list_tasks(&self, project_id: Option<&str>) -> Result<Vec<AtomicTask>, EngineError> {
        let tasks = self.list_entities::<AtomicTask>("tasks").await?;
        Ok(match project_id {
            Some(pid) => tasks.into_iter().filter(|t| t.project_id == pid).collect(),
            None => tasks,
        })
    }

    pub async fn search_tasks(
        &self,
        query: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<AtomicTask>, EngineError> {
        let needle = query.to_lowercase();
        let tasks = self.list_tasks(project_id).await?;
        Ok(tasks
            .into_iter()
            .filter(|t| {
                t.title.to_lowercase().contains(&needle)
                    || t.description.to_lowercase().contains(&needle)
                    || t.tags.iter().any(|tag| tag.to_lowercase().contains(&needle))
            })
            .collect())
    }

    pub async fn get_tasks_by_status(
        &self,
        status: TaskStatus,
        project_id: Option<&str>,
    ) -> Result<Vec<AtomicTask>, EngineError> {
        let tasks = self.list_tasks(project_id).await?;
        Ok(tasks.into_iter().filter(|t| t.status == status).collect())
    }

    pub async fn get_tasks_by_priority(
        &self,
        priority: TaskPriority,
        project_id: Option<&str>,
    ) -> Result<Vec<AtomicTask>, EngineError> {
        let tasks = self.list_tasks(project_id).await?;
        Ok(tasks.into_iter().filter(|t| t.priority == priority).collect())
    }

    /// Delete a task and every dependency edge referencing it.
    pub async fn delete_task(&self, id: &str) -> Result<(), EngineError> {
        let _guard = self.lock(&format!("task:{id}")).await;
        if !self.entity_path("tasks", id).exists() {
            return Err(EngineError::NotFound(format!("task {id}")));
        }

        let edges: Vec<Dependency> = self
            .list_entities::<Dependency>("dependencies")
            .await?
            .into_iter()
            .filter(|d| d.from_task == id || d.to_task == id)
            .collect();
        for edge in &edges {
            let _dep_guard = self.lock(&format!("dependency:{}", edge.id)).await;
            self.delete_entity("dependencies", &edge.id).await?;
        }

        self.delete_entity("tasks", id).await
    }

    // ---- dependencies --------------------------------------------------

    pub async fn create_dependency(&self, dep: &Dependency) -> Result<(), EngineError> {
        let _guard = self.lock(&format!("dependency:{}", dep.id)).await;
        self.create_entity("dependencies", &dep.id, dep, dependency_entry(dep))
            .await
    }

    pub async fn get_dependency(&self, id: &str) -> Result<Dependency, EngineError> {
        self.read_entity("dependencies", id).await
    }

    pub async fn update_dependency(&self, dep: &Dependency) -> Result<(), EngineError> {
        let _guard = self.lock(&format!("dependency:{}", dep.id)).await;
        self.update_entity("dependencies", &dep.id, dep, dependency_entry(dep))
            .await
    }

    pub async fn dependency_exists(&self, id: &str) -> bool {
        self.entity_path("dependencies", id).exists()
    }

    pub async fn list_dependencies(&self) -> Result<Vec<Dependency>, EngineError> {
        self.list_entities("dependencies").await
    }

    pub async fn delete_dependency(&self, id: &str) -> Result<(), EngineError> {
        let _guard = self.lock(&format!("dependency:{id}")).await;
        self.delete_entity("dependencies", id).await
    }

    // ---- dependency graphs ---------------------------------------------

    pub async fn save_graph(&self, snapshot: &GraphSnapshot) -> Result<(), EngineError> {
        let path = self
            .data_dir
            .join("dependency-graphs")
            .join(format!("{}.json", snapshot.project_id));
        self.write_json(&path, snapshot).await
    }

    pub async fn load_graph(&self, project_id: &str) -> Result<GraphSnapshot, EngineError> {
        let path = self
            .data_dir
            .join("dependency-graphs")
            .join(format!("{project_id}.json"));
        if !path.exists() {
            return Err(EngineError::NotFound(format!("dependency graph for {project_id}")));
        }
        self.read_json(&path).await
    }

    // ---- orchestration snapshots ---------------------------------------

    pub async fn snapshot_agents(&self, agents: &[Agent]) -> Result<(), EngineError> {
        let path = self.data_dir.join("orchestration").join("agents.json");
        self.write_json(&path, &agents).await
    }

    pub async fn snapshot_workflows(&self, workflows: &[Workflow]) -> Result<(), EngineError> {
        let path = self.data_dir.join("orchestration").join("workflows.json");
        self.write_json(&path, &workflows).await
    }

    // ---- shared plumbing -----------------------------------------------

    async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    fn entity_path(&self, collection: &str, id: &str) -> PathBuf {
        self.data_dir.join(collection).join(format!("{id}.yaml"))
    }

    fn index_path(&self, collection: &str) -> PathBuf {
        self.data_dir.join(format!("{collection}-index.json"))
    }

    async fn create_entity<T: Serialize>(
        &self,
        collection: &str,
        id: &str,
        value: &T,
        entry: IndexEntry,
    ) -> Result<(), EngineError> {
        let path = self.entity_path(collection, id);
        if path.exists() {
            return Err(EngineError::AlreadyExists(format!("{collection}/{id}")));
        }
        self.write_yaml(&path, value).await?;
        self.update_index(collection, |index| index.upsert(entry)).await
    }

    async fn update_entity<T: Serialize>(
        &self,
        collection: &str,
        id: &str,
        value: &T,
        entry: IndexEntry,
    ) -> Result<(), EngineError> {
        let path = self.entity_path(collection, id);
        if !path.exists() {
            return Err(EngineError::NotFound(format!("{collection}/{id}")));
        }
        self.write_yaml(&path, value).await?;
        self.update_index(collection, |index| index.upsert(entry)).await
    }

    async fn read_entity<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<T, EngineError> {
        let path = self.entity_path(collection, id);
        if !path.exists() {
            return Err(EngineError::NotFound(format!("{collection}/{id}")));
        }
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| EngineError::System(format!("reading {collection}/{id}: {e}")))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| EngineError::Parse(format!("{collection}/{id} is corrupt: {e}")))
    }

    async fn delete_entity(&self, collection: &str, id: &str) -> Result<(), EngineError> {
        let path = self.entity_path(collection, id);
        if !path.exists() {
            return Err(EngineError::NotFound(format!("{collection}/{id}")));
        }
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| EngineError::System(format!("deleting {collection}/{id}: {e}")))?;
        self.update_index(collection, |index| index.remove(id)).await
    }

    async fn list_entities<T: DeserializeOwned>(
        &self,
        collection: &str,
    ) -> Result<Vec<T>, EngineError> {
        let index = self.read_index(collection).await?;
        futures::future::try_join_all(
            index
                .entities
                .iter()
                .map(|entry| self.read_entity(collection, &entry.id)),
        )
        .await
    }

    async fn read_index(&self, collection: &str) -> Result<CollectionIndex, EngineError> {
        let path = self.index_path(collection);
        if !path.exists() {
            return Ok(CollectionIndex::empty());
        }
        self.read_json(&path).await
    }

    async fn update_index<F>(&self, collection: &str, mutate: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut CollectionIndex),
    {
        let _guard = self.lock(&format!("index:{collection}")).await;
        let mut index = self.read_index(collection).await?;
        mutate(&mut index);
        self.write_json(&self.index_path(collection), &index).await
    }

    async fn write_yaml<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), EngineError> {
        let body = serde_yaml::to_string(value)
            .map_err(|e| EngineError::Parse(format!("serializing {}: {e}", path.display())))?;
        self.write_atomic(path, body.as_bytes()).await
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), EngineError> {
        let body = serde_json::to_vec_pretty(value)
            .map_err(|e| EngineError::Parse(format!("serializing {}: {e}", path.display())))?;
        self.write_atomic(path, &body).await
    }

    /// Write to a sibling temp file, then rename over the target.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::System(format!("creating {}: {e}", parent.display())))?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| EngineError::System(format!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| EngineError::System(format!("renaming into {}: {e}", path.display())))?;
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, EngineError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::System(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| EngineError::Parse(format!("{} is corrupt: {e}", path.display())))
    }
}

fn project_entry(project: &Project) -> IndexEntry {
    IndexEntry {
        id: project.id.clone(),
        summary: project.name.clone(),
        status: serde_yaml::to_string(&project.status)
            .ok()
            .map(|s| s.trim().to_string()),
        updated_at: project.updated_at,
    }
}

fn epic_entry(epic: &Epic) -> IndexEntry {
    IndexEntry {
        id: epic.id.clone(),
        summary: epic.title.clone(),
        status: serde_yaml::to_string(&epic.status).ok().map(|s| s.trim().to_string()),
        updated_at: epic.updated_at,
    }
}

fn task_entry(task: &AtomicTask) -> IndexEntry {
    IndexEntry {
        id: task.id.clone(),
        summary: task.title.clone(),
        status: serde_yaml::to_string(&task.status).ok().map(|s| s.trim().to_string()),
        updated_at: task.updated_at,
    }
}

fn dependency_entry(dep: &Dependency) -> IndexEntry {
    IndexEntry {
        id: dep.id.clone(),
        summary: format!("{} -> {}", dep.from_task, dep.to_task),
        status: None,
        updated_at: dep.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DependencyType;

    async fn store() -> (tempfile::TempDir, EntityStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = EntityStore::new(dir.path());
        store.initialize().await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (dir, store) = store().await;
        store.initialize().await.unwrap();
        store.initialize().await.unwrap();
        assert!(dir.path().join("projects-index.json").exists());
        assert!(dir.path().join("orchestration/logs").is_dir());
    }

    #[tokio::test]
    async fn test_task_round_trip_through_yaml() {
        let (_dir, store) = store().await;
        let mut task = AtomicTask::new("T0001", "P001", "E001", "Add login route");
        task.estimated_hours = 0.25;
        task.acceptance_criteria = vec!["route returns 200".into()];
        store.create_task(&task).await.unwrap();

        let loaded = store.get_task("T0001").await.unwrap();
        assert_eq!(task, loaded);
    }

    #[tokio::test]
    async fn test_create_twice_is_already_exists() {
        let (_dir, store) = store().await;
        let project = Project::new("P001", "demo", "/tmp/demo");
        store.create_project(&project).await.unwrap();
        let err = store.create_project(&project).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_dir, store) = store().await;
        let err = store.get_task("nope").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
        let err = store.delete_task("nope").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_parse_error() {
        let (dir, store) = store().await;
        let task = AtomicTask::new("T0001", "P001", "E001", "Write docs");
        store.create_task(&task).await.unwrap();
        tokio::fs::write(dir.path().join("tasks/T0001.yaml"), ": not yaml :\n-")
            .await
            .unwrap();
        let err = store.get_task("T0001").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Parsing);
    }

    #[tokio::test]
    async fn test_search_matches_title_description_tags() {
        let (_dir, store) = store().await;
        let mut a = AtomicTask::new("T1", "P1", "E1", "Implement OAuth flow");
        a.tags = vec!["auth".into()];
        let mut b = AtomicTask::new("T2", "P1", "E1", "Write README");
        b.description = "document the auth setup".into();
        let c = AtomicTask::new("T3", "P2", "E2", "Tune cache eviction");
        for t in [&a, &b, &c] {
            store.create_task(t).await.unwrap();
        }

        let hits = store.search_tasks("AUTH", None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T2"]);

        let scoped = store.search_tasks("auth", Some("P2")).await.unwrap();
        assert!(scoped.is_empty());
    }

    #[tokio::test]
    async fn test_status_and_priority_filters() {
        let (_dir, store) = store().await;
        let mut a = AtomicTask::new("T1", "P1", "E1", "A");
        a.status = TaskStatus::Completed;
        a.priority = TaskPriority::Critical;
        let b = AtomicTask::new("T2", "P1", "E1", "B");
        store.create_task(&a).await.unwrap();
        store.create_task(&b).await.unwrap();

        let done = store.get_tasks_by_status(TaskStatus::Completed, None).await.unwrap();
        assert_eq!(done.len(), 1);
        let critical = store
            .get_tasks_by_priority(TaskPriority::Critical, Some("P1"))
            .await
            .unwrap();
        assert_eq!(critical[0].id, "T1");
    }

    #[tokio::test]
    async fn test_project_cascade_delete_removes_all_files() {
        let (dir, store) = store().await;
        let project = Project::new("P001", "demo", "/tmp/demo");
        store.create_project(&project).await.unwrap();

        for e in 0..2 {
            let epic = Epic::new(format!("E00{e}"), "P001", format!("epic {e}"));
            store.create_epic(&epic).await.unwrap();
        }
        for t in 0..10 {
            let task = AtomicTask::new(format!("T{t:03}"), "P001", "E000", format!("task {t}"));
            store.create_task(&task).await.unwrap();
        }
        for d in 0..4 {
            let dep = Dependency::new(
                format!("D{d:03}"),
                format!("T{d:03}"),
                format!("T{:03}", d + 1),
                DependencyType::Blocks,
            );
            store.create_dependency(&dep).await.unwrap();
        }

        store.delete_project("P001").await.unwrap();

        for sub in ["projects", "epics", "tasks", "dependencies"] {
            let mut entries = tokio::fs::read_dir(dir.path().join(sub)).await.unwrap();
            assert!(entries.next_entry().await.unwrap().is_none(), "{sub} not empty");
        }
        let index = store.read_index("tasks").await.unwrap();
        assert!(index.entities.is_empty());
    }

    #[tokio::test]
    async fn test_delete_task_removes_referencing_edges() {
        let (_dir, store) = store().await;
        let a = AtomicTask::new("A", "P1", "E1", "a");
        let b = AtomicTask::new("B", "P1", "E1", "b");
        store.create_task(&a).await.unwrap();
        store.create_task(&b).await.unwrap();
        let dep = Dependency::new("D1", "A", "B", DependencyType::Blocks);
        store.create_dependency(&dep).await.unwrap();

        store.delete_task("A").await.unwrap();
        assert!(store.list_dependencies().await.unwrap().is_empty());
        assert!(store.task_exists("B").await);
    }
}
