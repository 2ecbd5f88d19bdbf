use log::{debug, warn};
use std::process::Stdio;
use tokio::process::Command;

/// 指标采集错误类型
#[derive(Debug)]
pub enum CollectError {
    /// 无法启动 shell 进程
    Spawn(std::io::Error),
    /// 命令以非零状态退出
    Exit { code: Option<i32>, stderr: String },
    /// 输出格式不符合预期
    Parse(String),
}

impl From<std::io::Error> for CollectError {
    #[inline]
    fn from(error: std::io::Error) -> Self {
        CollectError::Spawn(error)
    }
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Spawn(e) => write!(f, "进程启动失败: {e}"),
            CollectError::Exit {
                code: Some(code),
                stderr,
            } => write!(f, "命令退出码 {code}: {}", stderr.trim()),
            CollectError::Exit { code: None, stderr } => {
                write!(f, "命令被信号终止: {}", stderr.trim())
            }
            CollectError::Parse(s) => write!(f, "解析错误: {s}"),
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CollectError>;

/// 通过 `sh -c` 执行命令并返回完整的标准输出
///
/// 每次调用都会启动一个新进程。标准错误有内容但退出码为 0 时只记录警告，
/// 标准输出照常返回。
pub async fn run_command(command: &str) -> Result<String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(CollectError::Exit {
            code: output.status.code(),
            stderr,
        });
    }

    if !stderr.trim().is_empty() {
        warn!("命令 `{command}` 输出了错误信息: {}", stderr.trim());
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    debug!("命令 `{command}` 输出: {stdout:?}");

    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_run_command_captures_stdout() {
        let out = run_command("echo temp=45.0\\'C").await.unwrap();
        assert_eq!(out, "temp=45.0'C\n");
    }

    #[tokio::test]
    async fn test_run_command_multiline_output() {
        let out = run_command("printf 'a\\nb\\nc\\n'").await.unwrap();
        assert_eq!(out.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_run_command_nonzero_exit() {
        let result = run_command("echo boom >&2; exit 3").await;
        match result {
            Err(CollectError::Exit { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr.trim(), "boom");
            }
            other => panic!("应该是 Exit 错误: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_command_stderr_with_success() {
        // 标准错误不影响成功退出时的输出
        let out = assert_ok!(run_command("echo warn >&2; echo 55").await);
        assert_eq!(out.trim(), "55");
    }

    #[tokio::test]
    async fn test_run_command_missing_binary() {
        let err = assert_err!(run_command("/nonexistent/definitely-not-here").await);
        assert!(matches!(err, CollectError::Exit { code: Some(127), .. }));
    }

    #[test]
    fn test_collect_error_display() {
        let spawn = CollectError::Spawn(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "test error",
        ));
        assert_eq!(format!("{spawn}"), "进程启动失败: test error");

        let exit = CollectError::Exit {
            code: Some(1),
            stderr: "bad\n".to_string(),
        };
        assert_eq!(format!("{exit}"), "命令退出码 1: bad");

        let parse = CollectError::Parse("gpu_temp".to_string());
        assert_eq!(format!("{parse}"), "解析错误: gpu_temp");
    }

    #[test]
    fn test_collect_error_from_io() {
        let io_error =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied");
        match CollectError::from(io_error) {
            CollectError::Spawn(_) => {}
            _ => panic!("应该是 Spawn 类型"),
        }
    }
}
