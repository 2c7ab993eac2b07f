//! src/pipeline.rs
//! Sequences one packaging run: conflict check, staging, extraction, metadata,
//! tool provisioning, image build, cleanup.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::appdir::desktop::{self, IconSource};
use crate::appdir::{self, StagingLayout};
use crate::compress;
use crate::config::{AppConfig, IconPolicy};
use crate::context::BuildContext;
use crate::error::{IoContext, PackError};
use crate::perms;
use crate::tool::builder::{self, Stream};
use crate::tool::download::{self, DownloadProgress};
use crate::tool::{self, ExternalTool};

/// Where a run currently is. Runs only move forward; any failure jumps to `Cleanup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    ConflictCheck,
    Staging,
    Extracting,
    Metadata,
    ToolReady,
    Building,
    Cleanup,
    Success,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Init => "Starting",
            Stage::ConflictCheck => "Checking for a previous AppDir",
            Stage::Staging => "Creating AppDir",
            Stage::Extracting => "Extracting release archive",
            Stage::Metadata => "Configuring AppDir",
            Stage::ToolReady => "Preparing image builder",
            Stage::Building => "Building AppImage",
            Stage::Cleanup => "Cleaning up",
            Stage::Success => "Done",
            Stage::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Everything a run shows to, or asks of, the operator.
pub trait Console {
    fn stage(&mut self, stage: Stage);
    fn info(&mut self, message: &str);
    fn warn(&mut self, message: &str);
    fn error(&mut self, error: &PackError);
    fn progress(&mut self, progress: &DownloadProgress);
    fn output(&mut self, stream: Stream, line: &str);
    /// Blocking yes/no question.
    fn confirm(&mut self, question: &str) -> io::Result<bool>;
}

/// One packaging run over an immutable context.
pub struct Pipeline<'a> {
    ctx: &'a BuildContext,
    config: &'a AppConfig,
    console: &'a mut dyn Console,
    tool: ExternalTool,
    // Set once the AppDir path is ours to delete.
    owns_staging: bool,
    cleaned: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(ctx: &'a BuildContext, config: &'a AppConfig, console: &'a mut dyn Console) -> Self {
        let tool = ExternalTool::for_context(config.builder, ctx, config.tool_url.as_deref());
        Pipeline {
            ctx,
            config,
            console,
            tool,
            owns_staging: false,
            cleaned: false,
        }
    }

    /// Runs every stage and returns the image path. On error the staging
    /// directory has already been cleaned up.
    pub async fn execute(mut self) -> Result<PathBuf, PackError> {
        self.console.stage(Stage::Init);
        let result = self.stages().await;
        if result.is_err() && !self.cleaned {
            self.console.stage(Stage::Cleanup);
            self.cleanup();
        }
        result
    }

    async fn stages(&mut self) -> Result<PathBuf, PackError> {
        let icon = self.resolve_icon()?;
        self.check_conflict()?;

        self.console.stage(Stage::Staging);
        let layout = appdir::create_layout(self.ctx)?;

        self.console.stage(Stage::Extracting);
        self.populate(&layout)?;

        self.console.stage(Stage::Metadata);
        let icon_name = desktop::install_icon(&layout, &icon)?;
        desktop::write_desktop_entry(&layout, Some(&icon_name))?;
        desktop::write_entry_point_script(&layout)?;

        self.console.stage(Stage::ToolReady);
        let client = reqwest::Client::builder()
            .user_agent(concat!("neu-appimage/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PackError::download(&self.tool.url, e))?;
        if !self.tool.is_present() {
            self.console
                .info(&format!("Downloading {}", self.tool.file_name()));
        }
        let console = &mut *self.console;
        download::ensure_tool(&self.tool, &client, |p| console.progress(p)).await?;

        self.console.stage(Stage::Building);
        let (files, bytes) = layout.summary();
        tracing::debug!(files, bytes, builder = %self.config.builder, "AppDir staged");
        let invocation = self.tool.invocation(self.ctx, &layout);
        let console = &mut *self.console;
        let outcome = builder::build(&invocation, |stream, line| console.output(stream, line)).await;

        // Reached the builder: both the AppDir and the tool go, whatever the outcome.
        self.console.stage(Stage::Cleanup);
        self.cleanup();
        self.dispose_tool();

        let code = outcome?;
        if code != 0 {
            return Err(PackError::BuildFailure {
                tool: self.config.builder.to_string(),
                code,
            });
        }

        let image = self.ctx.image_path();
        if !image.is_file() {
            return Err(PackError::MissingImage {
                tool: self.config.builder.to_string(),
                image,
            });
        }
        self.console.stage(Stage::Success);
        Ok(image)
    }

    // Decided before anything is written so the strict policy never leaves a
    // half-built AppDir behind.
    fn resolve_icon(&mut self) -> Result<IconSource, PackError> {
        if let Some(icon) = &self.ctx.icon {
            return Ok(IconSource::File(icon.clone()));
        }
        match self.config.icon_policy {
            IconPolicy::Fallback => {
                self.console
                    .warn("no icon configured, the default neu-appimage icon will be used");
                Ok(IconSource::Bundled)
            }
            IconPolicy::Strict => {
                self.console.warn("no icon configured");
                Err(PackError::Configuration(
                    "an icon is required (set \"icon\" in neutralino.config.json)".to_string(),
                ))
            }
        }
    }

    fn check_conflict(&mut self) -> Result<(), PackError> {
        self.console.stage(Stage::ConflictCheck);
        let root = &self.ctx.appdir;
        if root.exists() {
            let question = format!("{} already exists! Would you like to replace it", root.display());
            let overwrite = self
                .console
                .confirm(&question)
                .io_context(|| "reading overwrite confirmation")?;
            if !overwrite {
                return Err(PackError::Declined(root.clone()));
            }
            appdir::remove_layout(root)
                .io_context(|| format!("removing {}", root.display()))?;
            self.owns_staging = true;
        } else {
            self.owns_staging = true;
        }
        Ok(())
    }

    fn populate(&self, layout: &StagingLayout) -> Result<(), PackError> {
        let filter = self.config.builder.release_filter(self.ctx);
        compress::extract_archive(&self.ctx.archive, &layout.bin_dir, |entry| filter.accepts(entry))?;

        let binary = layout.binary_path();
        if !binary.is_file() {
            return Err(PackError::extract(
                &self.ctx.archive,
                format!("release archive has no {}", layout.binary_name),
            ));
        }
        perms::set_executable(&binary).io_context(|| format!("chmod +x {}", binary.display()))
    }

    /// Removes the staging directory if this run owns it. Runs at most once;
    /// a failed removal is reported, not retried.
    fn cleanup(&mut self) {
        if !self.owns_staging || self.cleaned {
            return;
        }
        self.cleaned = true;
        match appdir::remove_layout(&self.ctx.appdir) {
            Ok(removed) => {
                if removed {
                    tracing::debug!(path = %self.ctx.appdir.display(), "removed AppDir");
                }
            }
            Err(e) => {
                self.console.error(&PackError::io(
                    format!("removing {}", self.ctx.appdir.display()),
                    e,
                ));
                self.console.warn(&format!(
                    "some items were not deleted, please delete {} and its subdirectories",
                    self.ctx.appdir.display()
                ));
            }
        }
    }

    fn dispose_tool(&mut self) {
        if self.config.keep_tool {
            return;
        }
        if let Err(e) = tool::remove_tool(&self.tool.path) {
            self.console.warn(&format!("could not delete {}: {}", self.tool.path.display(), e));
        }
    }
}

/// Runs the pipeline and maps the outcome to a process exit status.
pub async fn run(ctx: &BuildContext, config: &AppConfig, console: &mut dyn Console) -> ExitCode {
    match Pipeline::new(ctx, config, console).execute().await {
        Ok(image) => {
            console.info(&format!(
                "Your AppImage has been built successfully: {}",
                display_relative(&image, &ctx.project_root)
            ));
            ExitCode::SUCCESS
        }
        Err(e) => {
            console.stage(Stage::Failed);
            console.error(&e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn display_relative(path: &Path, base: &Path) -> String {
    path.strip_prefix(base).unwrap_or(path).display().to_string()
}

/// Removes leftovers of an interrupted run. Returns what was deleted.
pub fn clean(ctx: &BuildContext, config: &AppConfig) -> Result<Vec<PathBuf>, PackError> {
    let mut removed = Vec::new();
    if appdir::remove_layout(&ctx.appdir).io_context(|| format!("removing {}", ctx.appdir.display()))? {
        removed.push(ctx.appdir.clone());
    }
    let tool = ExternalTool::for_context(config.builder, ctx, config.tool_url.as_deref());
    if tool::remove_tool(&tool.path).io_context(|| format!("removing {}", tool.path.display()))? {
        removed.push(tool.path);
    }
    Ok(removed)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::context::HostArch;
    use crate::tool::BuilderKind;
    use std::fs;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    #[derive(Default)]
    struct RecordingConsole {
        answer: bool,
        asked: usize,
        stages: Vec<Stage>,
        warnings: Vec<String>,
        errors: Vec<String>,
        lines: Vec<(Stream, String)>,
        infos: Vec<String>,
    }

    impl Console for RecordingConsole {
        fn stage(&mut self, stage: Stage) {
            self.stages.push(stage);
        }
        fn info(&mut self, message: &str) {
            self.infos.push(message.to_string());
        }
        fn warn(&mut self, message: &str) {
            self.warnings.push(message.to_string());
        }
        fn error(&mut self, error: &PackError) {
            self.errors.push(error.to_string());
        }
        fn progress(&mut self, _progress: &DownloadProgress) {}
        fn output(&mut self, stream: Stream, line: &str) {
            self.lines.push((stream, line.to_string()));
        }
        fn confirm(&mut self, _question: &str) -> io::Result<bool> {
            self.asked += 1;
            Ok(self.answer)
        }
    }

    struct Project {
        _dir: tempfile::TempDir,
        _exec: std::sync::MutexGuard<'static, ()>,
        ctx: BuildContext,
    }

    const RELEASE: &[&str] = &["myapp-linux_x64", "myapp-mac_x64", "myapp-win_x64.exe", "resources.neu"];

    // A Neutralino project named `myapp` with a release archive and an icon.
    fn project(with_icon: bool) -> Project {
        let exec = builder::exec_lock();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("myapp");
        fs::create_dir_all(root.join("dist")).unwrap();
        fs::create_dir_all(root.join("resources/icons")).unwrap();
        fs::write(root.join("resources/icons/appIcon.png"), b"\x89PNG").unwrap();

        let mut zip = zip::ZipWriter::new(fs::File::create(root.join("dist/myapp-release.zip")).unwrap());
        for name in RELEASE {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(name.as_bytes()).unwrap();
        }
        zip.finish().unwrap();

        let icon = with_icon.then(|| PathBuf::from("/resources/icons/appIcon.png"));
        let ctx = BuildContext::new(&root, icon, HostArch::new("x86_64")).unwrap();
        Project { _dir: dir, _exec: exec, ctx }
    }

    // Stands in for linuxdeploy: records the staged metadata into $OUTPUT.
    fn fake_linuxdeploy(ctx: &BuildContext, body: &str) -> PathBuf {
        let path = ctx.project_root.join("linuxdeploy-x86_64.AppImage");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        path
    }

    const RECORDING_BUILDER: &str = r#"test "$1" = "--appdir" || exit 2
test -x "$2/usr/bin/myapp-linux_x64" || exit 3
test ! -e "$2/usr/bin/myapp-win_x64.exe" || exit 4
test ! -e "$2/stale.txt" || exit 5
echo "Deploying files into AppDir root directory $2"
cat "$2/myapp.desktop" "$2/AppRun" > "$OUTPUT""#;

    fn config() -> AppConfig {
        AppConfig {
            tool_url: Some("http://127.0.0.1:9/unreachable".to_string()),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn successful_run_leaves_only_the_image() {
        let p = project(true);
        let tool = fake_linuxdeploy(&p.ctx, RECORDING_BUILDER);
        let mut console = RecordingConsole::default();

        let image = Pipeline::new(&p.ctx, &config(), &mut console).execute().await.unwrap();

        assert_eq!(image, p.ctx.project_root.join("myapp-x86_64.AppImage"));
        let recorded = fs::read_to_string(&image).unwrap();
        assert!(recorded.starts_with("[Desktop Entry]\nName=myapp\nExec=myapp-linux_x64\nIcon=appIcon\nType=Application\nCategories=Utility\n"));
        assert!(recorded.contains("exec \"${EXEC}\" \"$@\""));
        assert!(!p.ctx.appdir.exists());
        assert!(!tool.exists());
        assert_eq!(console.asked, 0);
        assert_eq!(console.stages.last(), Some(&Stage::Success));
        assert!(console
            .lines
            .iter()
            .any(|(s, l)| *s == Stream::Stdout && l.starts_with("Deploying files")));
    }

    #[tokio::test]
    async fn stages_run_in_order() {
        let p = project(true);
        fake_linuxdeploy(&p.ctx, RECORDING_BUILDER);
        let mut console = RecordingConsole::default();

        Pipeline::new(&p.ctx, &config(), &mut console).execute().await.unwrap();

        assert_eq!(
            console.stages,
            vec![
                Stage::Init,
                Stage::ConflictCheck,
                Stage::Staging,
                Stage::Extracting,
                Stage::Metadata,
                Stage::ToolReady,
                Stage::Building,
                Stage::Cleanup,
                Stage::Success,
            ]
        );
    }

    #[tokio::test]
    async fn rerun_with_overwrite_produces_identical_metadata() {
        let p = project(true);
        let mut images = Vec::new();
        for _ in 0..2 {
            fs::create_dir_all(&p.ctx.appdir).unwrap();
            fs::write(p.ctx.appdir.join("stale.txt"), b"left over").unwrap();
            fake_linuxdeploy(&p.ctx, RECORDING_BUILDER);
            let mut console = RecordingConsole { answer: true, ..Default::default() };

            let image = Pipeline::new(&p.ctx, &config(), &mut console).execute().await.unwrap();

            assert_eq!(console.asked, 1);
            images.push(fs::read(image).unwrap());
        }
        assert_eq!(images[0], images[1]);
    }

    #[tokio::test]
    async fn declining_overwrite_touches_nothing() {
        let p = project(true);
        fs::create_dir_all(&p.ctx.appdir).unwrap();
        fs::write(p.ctx.appdir.join("marker"), b"keep me").unwrap();
        let mut console = RecordingConsole { answer: false, ..Default::default() };

        let err = Pipeline::new(&p.ctx, &config(), &mut console).execute().await.unwrap_err();

        assert_eq!(err.kind(), "declined");
        assert_eq!(err.exit_code(), 1);
        assert_eq!(fs::read(p.ctx.appdir.join("marker")).unwrap(), b"keep me");
        assert!(!console.stages.contains(&Stage::Staging));
        assert!(!p.ctx.project_root.join("linuxdeploy-x86_64.AppImage").exists());
    }

    #[tokio::test]
    async fn failed_extraction_removes_the_appdir() {
        let p = project(true);
        fs::remove_file(&p.ctx.archive).unwrap();
        let mut console = RecordingConsole::default();

        let err = Pipeline::new(&p.ctx, &config(), &mut console).execute().await.unwrap_err();

        assert_eq!(err.kind(), "extract");
        assert!(!p.ctx.appdir.exists());
        assert!(!console.stages.contains(&Stage::Metadata));
    }

    #[tokio::test]
    async fn archive_without_linux_binary_fails_extraction() {
        let p = project(true);
        let arm = BuildContext::new(&p.ctx.project_root, p.ctx.icon.clone(), HostArch::new("aarch64")).unwrap();
        let mut console = RecordingConsole::default();

        let err = Pipeline::new(&arm, &config(), &mut console).execute().await.unwrap_err();

        assert_eq!(err.kind(), "extract");
        assert!(err.to_string().contains("myapp-linux_arm64"));
        assert!(!arm.appdir.exists());
    }

    #[tokio::test]
    async fn builder_failure_still_cleans_up_and_propagates_code() {
        let p = project(true);
        let tool = fake_linuxdeploy(
            &p.ctx,
            "echo \"ERROR: Could not find icon executable for Icon entry: appIcon\" >&2\nexit 1",
        );
        let mut console = RecordingConsole::default();

        let code = run(&p.ctx, &config(), &mut console).await;

        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::from(1)));
        assert!(!p.ctx.appdir.exists());
        assert!(!tool.exists());
        assert!(console.lines.contains(&(
            Stream::Stderr,
            "ERROR: Could not find icon executable for Icon entry: appIcon".to_string()
        )));
        assert_eq!(console.stages.last(), Some(&Stage::Failed));
        assert_eq!(console.stages.iter().filter(|s| **s == Stage::Cleanup).count(), 1);
        assert_eq!(console.errors, vec!["linuxdeploy exited with status 1".to_string()]);
    }

    #[tokio::test]
    async fn zero_exit_without_an_image_is_a_build_error() {
        let p = project(true);
        let tool = fake_linuxdeploy(&p.ctx, "echo \"Deploying files\"\nexit 0");
        let mut console = RecordingConsole::default();

        let code = run(&p.ctx, &config(), &mut console).await;

        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::from(1)));
        assert!(!p.ctx.appdir.exists());
        assert!(!tool.exists());
        assert!(!p.ctx.image_path().exists());
        assert_eq!(console.stages.last(), Some(&Stage::Failed));
        assert!(!console.stages.contains(&Stage::Success));
        assert_eq!(console.errors.len(), 1);
        assert!(console.errors[0].contains("was not created"), "{:?}", console.errors);
    }

    #[tokio::test]
    async fn unreachable_tool_url_fails_download_and_removes_the_appdir() {
        let p = project(true);
        let tool = p.ctx.project_root.join("linuxdeploy-x86_64.AppImage");
        let cfg = AppConfig {
            tool_url: Some("http://127.0.0.1:9/linuxdeploy".to_string()),
            ..config()
        };
        let mut console = RecordingConsole::default();

        let err = Pipeline::new(&p.ctx, &cfg, &mut console).execute().await.unwrap_err();

        assert_eq!(err.kind(), "download");
        assert_eq!(err.exit_code(), 1);
        assert!(!p.ctx.appdir.exists());
        assert!(!tool.exists());
        assert!(!console.stages.contains(&Stage::Building));
        assert_eq!(
            &console.stages[console.stages.len() - 2..],
            &[Stage::ToolReady, Stage::Cleanup]
        );
    }

    #[tokio::test]
    async fn unrunnable_tool_is_a_spawn_error_and_removes_the_appdir() {
        let p = project(true);
        let tool = p.ctx.project_root.join("linuxdeploy-x86_64.AppImage");
        fs::write(&tool, b"not an executable\n").unwrap();
        let mut console = RecordingConsole::default();

        let code = run(&p.ctx, &config(), &mut console).await;

        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::from(1)));
        assert!(!p.ctx.appdir.exists());
        assert_eq!(console.stages.last(), Some(&Stage::Failed));
        assert_eq!(console.stages.iter().filter(|s| **s == Stage::Cleanup).count(), 1);
        assert_eq!(console.errors.len(), 1);
        assert!(console.errors[0].starts_with("could not start"), "{:?}", console.errors);
    }

    #[tokio::test]
    async fn failed_overwrite_removal_is_reported_once() {
        let p = project(true);
        // A file where the AppDir should be cannot be removed as a directory.
        fs::write(&p.ctx.appdir, b"not a directory").unwrap();
        let mut console = RecordingConsole { answer: true, ..Default::default() };

        let code = run(&p.ctx, &config(), &mut console).await;

        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::from(1)));
        assert_eq!(console.asked, 1);
        assert_eq!(console.errors.len(), 1, "{:?}", console.errors);
        assert!(console.errors[0].starts_with("removing "));
        assert!(console.warnings.is_empty(), "{:?}", console.warnings);
        assert!(!console.stages.contains(&Stage::Staging));
        assert_eq!(fs::read(&p.ctx.appdir).unwrap(), b"not a directory");
    }

    #[tokio::test]
    async fn keep_tool_retains_the_builder() {
        let p = project(true);
        let tool = fake_linuxdeploy(&p.ctx, RECORDING_BUILDER);
        let cfg = AppConfig { keep_tool: true, ..config() };
        let mut console = RecordingConsole::default();

        Pipeline::new(&p.ctx, &cfg, &mut console).execute().await.unwrap();

        assert!(tool.exists());
        assert!(!p.ctx.appdir.exists());
    }

    #[tokio::test]
    async fn missing_icon_falls_back_to_bundled_icon() {
        let p = project(false);
        fake_linuxdeploy(
            &p.ctx,
            "test -f \"$2/neu-appimage.svg\" || exit 6\ncat \"$2/myapp.desktop\" > \"$OUTPUT\"",
        );
        let mut console = RecordingConsole::default();

        let image = Pipeline::new(&p.ctx, &config(), &mut console).execute().await.unwrap();

        assert!(fs::read_to_string(image).unwrap().contains("\nIcon=neu-appimage\n"));
        assert_eq!(console.warnings.len(), 1);
        assert!(console.warnings[0].contains("no icon configured"));
    }

    #[tokio::test]
    async fn missing_icon_under_strict_policy_stops_before_staging() {
        let p = project(false);
        let cfg = AppConfig { icon_policy: IconPolicy::Strict, ..config() };
        let mut console = RecordingConsole::default();

        let err = Pipeline::new(&p.ctx, &cfg, &mut console).execute().await.unwrap_err();

        assert_eq!(err.kind(), "config");
        assert!(!p.ctx.appdir.exists());
        assert!(!console.warnings.is_empty());
    }

    #[tokio::test]
    async fn appimagetool_gets_only_binary_and_resources() {
        let p = project(true);
        let path = p.ctx.project_root.join("appimagetool-x86_64.AppImage");
        fs::write(
            &path,
            "#!/bin/sh\nls \"$1/usr/bin\" > \"$2\"\ntest -z \"$OUTPUT\" || exit 7\n",
        )
        .unwrap();
        let cfg = AppConfig { builder: BuilderKind::AppImageTool, ..config() };
        let mut console = RecordingConsole::default();

        let image = Pipeline::new(&p.ctx, &cfg, &mut console).execute().await.unwrap();

        assert_eq!(fs::read_to_string(image).unwrap(), "myapp-linux_x64\nresources.neu\n");
    }

    #[test]
    fn clean_removes_leftovers() {
        let p = project(true);
        fs::create_dir_all(p.ctx.appdir.join("usr/bin")).unwrap();
        let tool = fake_linuxdeploy(&p.ctx, "exit 0");

        let removed = clean(&p.ctx, &config()).unwrap();

        assert_eq!(removed, vec![p.ctx.appdir.clone(), tool.clone()]);
        assert!(!p.ctx.appdir.exists());
        assert!(clean(&p.ctx, &config()).unwrap().is_empty());
    }
}
