use std::sync::LazyLock;

use serde::Deserialize;

use super::query::{field, on, Operation, QueryError, QueryText};
use super::{GraphQlClient, GraphQlError, GraphQlRequest};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CodexCategory {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub codex_categories: Vec<CodexCategory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CourseMembership {
    pub role: String,
    pub course: Course,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelSpec {
    pub id: String,
    pub build_status: String,
    #[serde(default)]
    pub events: Option<Vec<String>>,
    #[serde(default)]
    pub build_log: Option<Vec<String>>,
}

/// A codex and the current state of its kernel image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexBuild {
    pub codex_id: String,
    pub name: String,
    pub kernel: KernelSpec,
}

static VIEWER_QUERY: LazyLock<Result<QueryText, QueryError>> = LazyLock::new(|| {
    Operation::query([field("viewer").select([field("user").select([
        field("id"),
        field("name"),
        field("email"),
    ])])])
    .named("pbauthor_Viewer")
    .build()
});

static COURSES_QUERY: LazyLock<Result<QueryText, QueryError>> = LazyLock::new(|| {
    Operation::query([field("viewer").select([field("user").select([
        field("id"),
        field("courses").arg("roles", "[CourseRole!]").select([
            field("role"),
            field("course").select([
                field("id"),
                field("name"),
                field("codexCategories").select([field("id"), field("name")]),
            ]),
        ]),
    ])])])
    .named("pbauthor_Courses")
    .build()
});

static BUILD_STATUS_QUERY: LazyLock<Result<QueryText, QueryError>> = LazyLock::new(|| {
    Operation::query([field("node").arg("id", "ID!").select([on(
        "CodexMetadata",
        [
            field("id"),
            field("name"),
            field("kernelSpec").select([
                field("id"),
                field("buildStatus"),
                field("events"),
                field("buildLog").arg("offset", "Int").arg("limit", "Int"),
            ]),
        ],
    )])])
    .named("pbauthor_CodexBuildStatus")
    .build()
});

fn prepared(query: &'static LazyLock<Result<QueryText, QueryError>>) -> Result<&'static QueryText, GraphQlError> {
    query.as_ref().map_err(|err| GraphQlError::Query(err.clone()))
}

#[derive(Deserialize)]
struct ViewerData<U> {
    viewer: Viewer<U>,
}

#[derive(Deserialize)]
struct Viewer<U> {
    user: Option<U>,
}

#[derive(Deserialize)]
struct UserCourses {
    #[serde(default)]
    courses: Vec<CourseMembership>,
}

#[derive(Deserialize)]
struct NodeData {
    node: Option<CodexNode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodexNode {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    kernel_spec: Option<KernelSpec>,
}

impl GraphQlClient {
    pub async fn viewer(&self) -> Result<User, GraphQlError> {
        let request = GraphQlRequest::new(prepared(&VIEWER_QUERY)?);
        let data: ViewerData<User> = self.run(request).await?;
        data.viewer
            .user
            .ok_or_else(|| GraphQlError::NotFound("no user is associated with this login".into()))
    }

    /// Courses in which the current user holds one of `roles`.
    pub async fn courses(&self, roles: &[&str]) -> Result<Vec<CourseMembership>, GraphQlError> {
        let request = GraphQlRequest::new(prepared(&COURSES_QUERY)?).var("roles", roles)?;
        let data: ViewerData<UserCourses> = self.run(request).await?;
        Ok(data.viewer.user.map(|u| u.courses).unwrap_or_default())
    }

    /// Build status of a codex with `limit` build log lines starting at `offset`.
    pub async fn codex_build(
        &self,
        codex_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<CodexBuild, GraphQlError> {
        let request = GraphQlRequest::new(prepared(&BUILD_STATUS_QUERY)?)
            .var("id", codex_id)?
            .var("offset", offset)?
            .var("limit", limit)?;
        let data: NodeData = self.run(request).await?;
        codex_build_from_node(codex_id, data.node)
    }
}

fn codex_build_from_node(codex_id: &str, node: Option<CodexNode>) -> Result<CodexBuild, GraphQlError> {
    let node = node
        .filter(|n| !n.id.is_empty())
        .ok_or_else(|| GraphQlError::NotFound(format!("codex (id: {codex_id}) could not be found")))?;
    let kernel = node
        .kernel_spec
        .filter(|k| !k.id.is_empty())
        .ok_or_else(|| {
            GraphQlError::NotFound(format!("codex (id: {codex_id}) has no kernel spec"))
        })?;
    Ok(CodexBuild {
        codex_id: node.id,
        name: node.name,
        kernel,
    })
}
