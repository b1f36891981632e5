use std::io::IsTerminal;

use anyhow::{bail, Result};
use dialoguer::{theme::ColorfulTheme, FuzzySelect};
use tracing::debug;

use crate::graphql::{CodexCategory, Course, GraphQlClient};
use crate::ui::with_spinner;

/// Fuzzy select from a list of items. Requires TTY.
pub fn fuzzy_select<T: ToString>(prompt: &str, items: &[T]) -> Result<usize> {
    if !std::io::stdin().is_terminal() {
        bail!("interactive mode requires TTY");
    }

    if items.is_empty() {
        bail!("no items to select from");
    }

    let labels: Vec<String> = items.iter().map(|i| i.to_string()).collect();

    let selection = FuzzySelect::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&labels)
        .default(0)
        .interact()?;

    Ok(selection)
}

/// Interactive selector over the courses the user owns.
pub async fn select_course_interactive(client: &GraphQlClient) -> Result<Course> {
    let memberships = with_spinner("Loading courses...", client.courses(&["OWNER"])).await?;
    let mut courses: Vec<Course> = memberships
        .into_iter()
        .map(|m| {
            debug!(course = %m.course.name, role = %m.role, "found course");
            m.course
        })
        .collect();

    if courses.is_empty() {
        bail!("you are not the owner of any courses");
    }

    courses.sort_by(|a, b| a.name.cmp(&b.name));
    let names: Vec<&str> = courses.iter().map(|c| c.name.as_str()).collect();

    let selection = fuzzy_select("Select course", &names)?;
    Ok(courses.swap_remove(selection))
}

/// Picks a codex category of `course`, prompting only when there is a choice.
pub fn select_category(course: &Course) -> Result<CodexCategory> {
    match course.codex_categories.as_slice() {
        [] => bail!("course {:?} has no codex categories", course.name),
        [only] => Ok(only.clone()),
        categories => {
            let names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();
            let selection = fuzzy_select("Select codex category", &names)?;
            Ok(categories[selection].clone())
        }
    }
}
