//! Per-language build and run recipes.
//!
//! The table is built once at startup and only read afterwards, so it is
//! shared behind an `Arc` without any locking.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Mount point of the session working directory inside every container.
pub const CONTAINER_WORK_DIR: &str = "/code";

/// Image bundling every supported toolchain.
pub const DEFAULT_IMAGE: &str = "code-runner";

/// Builds a command line from the materialized source filename.
pub type CommandTemplate = fn(&str) -> Vec<String>;

/// How the source filename is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPoint {
    /// `main.<extension>`.
    MainFile,
    /// Named after the first public class declared in the source, so the
    /// toolchain finds the entry symbol.
    PublicClass,
}

#[derive(Debug, Clone)]
pub struct Recipe {
    /// Canonical language identifier.
    pub language: &'static str,
    /// Other identifiers resolving to this recipe.
    pub aliases: &'static [&'static str],
    /// Toolchain version shipped in the image, informational.
    pub version: &'static str,
    pub extension: &'static str,
    pub image: String,
    pub entry_point: EntryPoint,
    pub compile: Option<CommandTemplate>,
    pub run: CommandTemplate,
}

impl Recipe {
    pub fn needs_compile(&self) -> bool {
        self.compile.is_some()
    }

    pub fn compile_command(&self, filename: &str) -> Option<Vec<String>> {
        self.compile.map(|template| template(filename))
    }

    pub fn run_command(&self, filename: &str) -> Vec<String> {
        (self.run)(filename)
    }
}

/// Run a shell line on the session TTY with echo disabled, so stdin sent by
/// the client is not reflected back as program output.
fn tty_shell(line: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), format!("stty -echo && {}", line)]
}

fn cpp_compile(filename: &str) -> Vec<String> {
    vec![
        "g++".to_string(),
        "-o".to_string(),
        format!("{}/main", CONTAINER_WORK_DIR),
        format!("{}/{}", CONTAINER_WORK_DIR, filename),
    ]
}

fn cpp_run(_filename: &str) -> Vec<String> {
    tty_shell("./main".to_string())
}

fn java_compile(filename: &str) -> Vec<String> {
    vec![
        "javac".to_string(),
        format!("{}/{}", CONTAINER_WORK_DIR, filename),
    ]
}

fn java_run(filename: &str) -> Vec<String> {
    let class_name = filename.strip_suffix(".java").unwrap_or(filename);
    tty_shell(format!("java -cp {} {}", CONTAINER_WORK_DIR, class_name))
}

fn python_run(filename: &str) -> Vec<String> {
    tty_shell(format!("python {}/{}", CONTAINER_WORK_DIR, filename))
}

fn builtin_recipes() -> Vec<Recipe> {
    vec![
        Recipe {
            language: "cpp",
            aliases: &["c++"],
            version: "10.2.0",
            extension: "cpp",
            image: DEFAULT_IMAGE.to_string(),
            entry_point: EntryPoint::MainFile,
            compile: Some(cpp_compile),
            run: cpp_run,
        },
        Recipe {
            language: "java",
            aliases: &[],
            version: "15.0.2",
            extension: "java",
            image: DEFAULT_IMAGE.to_string(),
            entry_point: EntryPoint::PublicClass,
            compile: Some(java_compile),
            run: java_run,
        },
        Recipe {
            language: "python",
            aliases: &["python3"],
            version: "3.10.0",
            extension: "py",
            image: DEFAULT_IMAGE.to_string(),
            entry_point: EntryPoint::MainFile,
            compile: None,
            run: python_run,
        },
    ]
}

/// Public description of a recipe, as listed by the runtimes endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeInfo {
    pub language: String,
    pub version: String,
    pub aliases: Vec<String>,
    pub compiled: bool,
}

/// Immutable language identifier to recipe map.
#[derive(Debug, Clone)]
pub struct RecipeRegistry {
    by_id: HashMap<&'static str, Arc<Recipe>>,
    recipes: Vec<Arc<Recipe>>,
}

impl RecipeRegistry {
    /// The built-in table.
    pub fn builtin() -> Self {
        Self::from_recipes(builtin_recipes())
    }

    /// The built-in table with every image replaced.
    pub fn with_image(image: &str) -> Self {
        let recipes = builtin_recipes()
            .into_iter()
            .map(|mut recipe| {
                recipe.image = image.to_string();
                recipe
            })
            .collect();
        Self::from_recipes(recipes)
    }

    pub fn from_recipes(recipes: Vec<Recipe>) -> Self {
        let recipes: Vec<Arc<Recipe>> = recipes.into_iter().map(Arc::new).collect();
        let mut by_id = HashMap::new();
        for recipe in &recipes {
            by_id.insert(recipe.language, recipe.clone());
            for alias in recipe.aliases {
                by_id.insert(*alias, recipe.clone());
            }
        }
        Self { by_id, recipes }
    }

    /// Exact, case-sensitive lookup.
    pub fn resolve(&self, language: &str) -> Option<Arc<Recipe>> {
        self.by_id.get(language).cloned()
    }

    /// Every identifier that resolves, sorted.
    pub fn languages(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn runtimes(&self) -> Vec<RuntimeInfo> {
        self.recipes
            .iter()
            .map(|recipe| RuntimeInfo {
                language: recipe.language.to_string(),
                version: recipe.version.to_string(),
                aliases: recipe.aliases.iter().map(|a| a.to_string()).collect(),
                compiled: recipe.needs_compile(),
            })
            .collect()
    }
}

impl Default for RecipeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_flag_matches_language_model() {
        let registry = RecipeRegistry::builtin();
        for (language, compiled) in [
            ("cpp", true),
            ("c++", true),
            ("java", true),
            ("python", false),
            ("python3", false),
        ] {
            let recipe = registry.resolve(language).unwrap();
            assert_eq!(recipe.needs_compile(), compiled, "{}", language);
        }
    }

    #[test]
    fn test_lookup_is_exact() {
        let registry = RecipeRegistry::builtin();
        assert!(registry.resolve("Python").is_none());
        assert!(registry.resolve(" python").is_none());
        assert!(registry.resolve("rust").is_none());
        assert!(Arc::ptr_eq(
            &registry.resolve("cpp").unwrap(),
            &registry.resolve("c++").unwrap()
        ));
    }

    #[test]
    fn test_commands() {
        let registry = RecipeRegistry::builtin();

        let cpp = registry.resolve("cpp").unwrap();
        assert_eq!(
            cpp.compile_command("main.cpp").unwrap(),
            vec!["g++", "-o", "/code/main", "/code/main.cpp"]
        );
        assert_eq!(cpp.run_command("main.cpp"), vec!["sh", "-c", "stty -echo && ./main"]);

        let java = registry.resolve("java").unwrap();
        assert_eq!(
            java.compile_command("HelloWorld.java").unwrap(),
            vec!["javac", "/code/HelloWorld.java"]
        );
        assert_eq!(
            java.run_command("HelloWorld.java"),
            vec!["sh", "-c", "stty -echo && java -cp /code HelloWorld"]
        );

        let python = registry.resolve("python").unwrap();
        assert!(python.compile_command("main.py").is_none());
        assert_eq!(
            python.run_command("main.py"),
            vec!["sh", "-c", "stty -echo && python /code/main.py"]
        );
    }

    #[test]
    fn test_image_override() {
        let registry = RecipeRegistry::with_image("registry.local/runner:1");
        assert!(registry
            .runtimes()
            .iter()
            .all(|runtime| !runtime.language.is_empty()));
        assert_eq!(registry.resolve("java").unwrap().image, "registry.local/runner:1");
    }

    #[test]
    fn test_languages_and_runtimes() {
        let registry = RecipeRegistry::builtin();
        assert_eq!(
            registry.languages(),
            vec!["c++", "cpp", "java", "python", "python3"]
        );
        let runtimes = registry.runtimes();
        assert_eq!(runtimes.len(), 3);
        assert_eq!(runtimes[0].aliases, vec!["c++".to_string()]);
    }
}
