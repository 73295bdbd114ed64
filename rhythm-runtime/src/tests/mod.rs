//! Integration tests for rhythm-runtime

#[cfg(test)]
mod integration_tests {
    use crate::{
        abi::{CompilerModule, RuntimeError, RuntimeResult},
        classify::LoadError,
        harness::RunStatus,
        loader::{FactoryProvider, LoadState, LoaderSettings, ModuleFactory, ModuleLoader, ModuleOptions},
        locator::ContentLocator,
        session::{CompileRequest, Playground, PlaygroundError, Tone},
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Compiles each source line into a JS statement, the way the real
    /// compiler lays out its output.
    #[derive(Default)]
    struct LineCompiler {
        no_loop: AtomicBool,
        compiled: Mutex<Vec<String>>,
    }

    impl LineCompiler {
        fn render(&self, source: &str) -> RuntimeResult<String> {
            if self.no_loop.load(Ordering::SeqCst) && source.contains("while") {
                return Err(RuntimeError::CompileFailed(String::from(
                    "loops are disabled (line 1)",
                )));
            }
            if source.contains("@@") {
                return Err(RuntimeError::CompileFailed(String::from("unexpected token `@@`")));
            }

            let mut out = String::from(concat!(
                "const __rt = (() => {\n",
                "  const io = globalThis.__rhythmIO;\n",
                "  return { print: (v) => { io.stdout.push(String(v)); return null; },\n",
                "           input: () => io.stdin.shift() };\n",
                "})();\n",
                "\n",
                "let print = __rt.print;\n",
                "let input = __rt.input;\n",
                "\n",
                "try {\n",
                "  var core = { \"version\": 1 };\n",
            ));
            for line in source.lines().filter(|l| !l.trim().is_empty()) {
                out.push_str("  ");
                out.push_str(line.trim());
                out.push('\n');
            }
            out.push_str("} catch (err) {\n  throw err;\n}\n");
            Ok(out)
        }
    }

    impl CompilerModule for LineCompiler {
        fn compile(&self, source: &str) -> RuntimeResult<String> {
            self.compiled.lock().push(source.to_string());
            self.render(source)
        }

        fn compile_user_code_only(&self, source: &str) -> RuntimeResult<String> {
            self.render(source)?;
            Ok(source.trim().to_string())
        }

        fn set_no_loop(&self, enabled: bool) -> RuntimeResult<()> {
            self.no_loop.store(enabled, Ordering::SeqCst);
            Ok(())
        }
    }

    struct LineCompilerFactory {
        module: Arc<LineCompiler>,
        constructed: AtomicUsize,
    }

    #[async_trait]
    impl ModuleFactory for LineCompilerFactory {
        async fn construct(&self, _options: ModuleOptions) -> anyhow::Result<Arc<dyn CompilerModule>> {
            self.constructed.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(self.module.clone())
        }
    }

    struct Provider {
        factory: Arc<LineCompilerFactory>,
    }

    #[async_trait]
    impl FactoryProvider for Provider {
        async fn acquire(&self, _locator: &ContentLocator) -> Result<Arc<dyn ModuleFactory>, LoadError> {
            Ok(self.factory.clone())
        }
    }

    fn playground() -> (Playground, Arc<LineCompilerFactory>) {
        let factory = Arc::new(LineCompilerFactory {
            module: Arc::new(LineCompiler::default()),
            constructed: AtomicUsize::new(0),
        });
        let provider = Arc::new(Provider {
            factory: factory.clone(),
        });
        let loader = ModuleLoader::with_provider(LoaderSettings::new("/nonexistent/web"), provider);
        (Playground::new(loader), factory)
    }

    #[tokio::test]
    async fn test_initialize_reports_ready() {
        let (playground, _) = playground();
        let status = playground.initialize().await;

        assert_eq!(status.tone, Tone::Success);
        assert_eq!(status.message, "Transpiler ready.");
        assert_eq!(playground.loader().state(), LoadState::Ready);
    }

    #[tokio::test]
    async fn test_compile_only() {
        let (playground, _) = playground();
        let report = playground
            .compile(&CompileRequest::new("print(\"Hello, Rhythm!\");\n"))
            .await
            .unwrap();

        assert!(report.generated.contains("try {"));
        assert_eq!(report.user_program, "print(\"Hello, Rhythm!\");");
        assert!(report.run.is_none());
        assert_eq!(report.status.message, "Compilation succeeded.");
        assert_eq!(report.status.tone, Tone::Success);
    }

    #[tokio::test]
    async fn test_compile_and_run() {
        let (playground, _) = playground();
        let report = playground
            .compile(&CompileRequest::new("print(\"Hello, Rhythm!\\n\");\n").and_run(""))
            .await
            .unwrap();

        let run = report.run.unwrap();
        assert_eq!(run.stdout, "Hello, Rhythm!\n");
        assert_eq!(run.stderr, "");
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(report.status.message, "Program executed successfully.");
    }

    #[tokio::test]
    async fn test_run_reads_stdin() {
        let (playground, _) = playground();
        let source = "let a = input();\nlet b = input();\nprint(Number(a) + Number(b));\n";
        let report = playground
            .compile(&CompileRequest::new(source).and_run("3\r\n4"))
            .await
            .unwrap();

        assert_eq!(report.run.unwrap().stdout, "7");
    }

    #[tokio::test]
    async fn test_partial_output_survives_exception() {
        let (playground, _) = playground();
        let report = playground
            .compile(&CompileRequest::new("print(\"x\");\nthrow new Error(\"division by zero\");\n").and_run(""))
            .await
            .unwrap();

        let run = report.run.unwrap();
        assert_eq!(run.stdout, "x");
        assert_eq!(run.stderr, "division by zero");
        assert_eq!(report.status.message, "Program terminated with an exception.");
        assert_eq!(report.status.tone, Tone::Error);
    }

    #[tokio::test]
    async fn test_runtime_errors_status() {
        let (playground, _) = playground();
        let report = playground
            .compile(&CompileRequest::new("globalThis.__rhythmIO.stderr.push(\"warning\");\n").and_run(""))
            .await
            .unwrap();

        assert_eq!(report.run.unwrap().status, RunStatus::RuntimeErrors);
        assert_eq!(report.status.message, "Program finished with runtime errors.");
    }

    #[tokio::test]
    async fn test_blank_source_is_not_compiled() {
        let (playground, factory) = playground();
        let report = playground.compile(&CompileRequest::new("  \n\t")).await.unwrap();

        assert_eq!(report.generated, "");
        assert_eq!(report.status.tone, Tone::Info);
        assert_eq!(report.status.message, "No Rhythm source code to compile.");
        assert!(factory.module.compiled.lock().is_empty());
    }

    #[tokio::test]
    async fn test_no_loop_is_applied_per_request() {
        let (playground, _) = playground();
        let source = "while (false) {}\n";

        let err = playground
            .compile(&CompileRequest::new(source).no_loop(true))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status().message, "Compilation failed: loops are disabled (line 1)");

        assert!(playground.compile(&CompileRequest::new(source)).await.is_ok());
    }

    #[tokio::test]
    async fn test_compile_failure() {
        let (playground, _) = playground();
        let err = playground
            .compile(&CompileRequest::new("@@"))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, PlaygroundError::Compile(RuntimeError::CompileFailed(_))));
        assert!(err.status().is_error());
    }

    #[tokio::test]
    async fn test_baseline_compiled_once_across_requests() {
        let (playground, factory) = playground();
        for _ in 0..3 {
            playground.compile(&CompileRequest::new("print(1);")).await.unwrap();
        }

        let compiled = factory.module.compiled.lock().clone();
        assert_eq!(compiled.iter().filter(|s| s.as_str() == " ").count(), 1);
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compiler_user_view() {
        let (playground, _) = playground();
        let user = playground.compile_user_code_only("  print(2);\n", false).await.unwrap();
        assert_eq!(user, "print(2);");
    }

    #[tokio::test]
    async fn test_concurrent_actions_share_one_module() {
        let (playground, factory) = playground();
        let first = CompileRequest::new("print(1);");
        let second = CompileRequest::new("print(2);");
        let (a, b) = tokio::join!(playground.compile(&first), playground.compile(&second));

        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 1);
    }
}
