//! 外部工具输出解析
//!
//! 每个解析函数只处理一种命令的纯文本输出，格式不符时返回 `None`，
//! 调用方据此跳过本轮发布。分隔符与列位置即为与外部工具的约定。

/// 摄氏度转开尔文的偏移量
pub const KELVIN_OFFSET: f64 = 273.15;

/// mpstat 输出中 %idle 所在列
const MPSTAT_IDLE_COLUMN: usize = 11;

/// 保留指定位数的小数
#[inline]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// 解析有限数值，拒绝空串、NaN 与无穷大
#[inline]
fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// 取第一个 `=` 之后、`terminator` 之前的文本
#[inline]
fn value_between(text: &str, terminator: char) -> Option<&str> {
    let (_, rest) = text.split_once('=')?;
    rest.split(terminator).next()
}

/// GPU 温度：`temp=45.0'C` -> 318.15 K
pub fn parse_gpu_temp(output: &str) -> Option<f64> {
    let celsius = parse_number(value_between(output, '\'')?)?;
    Some(round_to(celsius + KELVIN_OFFSET, 2))
}

/// CPU 温度：热区文件中的毫摄氏度 -> K
pub fn parse_cpu_temp(output: &str) -> Option<f64> {
    let millidegrees = parse_number(output)?;
    Some(round_to(millidegrees / 1000.0 + KELVIN_OFFSET, 2))
}

/// 核心电压：`volt=1.2000V` -> 1.2
pub fn parse_core_voltage(output: &str) -> Option<f64> {
    let volts = parse_number(value_between(output, 'V')?)?;
    Some(round_to(volts, 4))
}

/// 电池电压：毫伏 -> 伏
pub fn parse_bat_voltage(output: &str) -> Option<f64> {
    let millivolts = parse_number(output)?;
    Some(round_to(millivolts / 1000.0, 5))
}

/// 降频标志：`throttled=0x50000` 取十六进制值的最后一位
///
/// 等号后为空时返回 `None`。
pub fn parse_throttled(output: &str) -> Option<String> {
    let value = value_between(output, '\n')?.trim_end_matches('\r');
    value.chars().last().map(String::from)
}

/// CPU 核心数，非数字或不大于 0 时按 1 处理
pub fn parse_cpu_count(output: &str) -> f64 {
    match parse_number(output) {
        Some(count) if count > 0.0 => count,
        _ => 1.0,
    }
}

/// 一分钟平均负载
#[inline]
pub fn parse_load_average(output: &str) -> Option<f64> {
    parse_number(output)
}

/// 每核平均负载
#[inline]
pub fn load_per_core(load: f64, cpu_count: f64) -> f64 {
    if cpu_count > 0.0 {
        load / cpu_count
    } else {
        load
    }
}

/// mpstat 解析结果
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CpuUtil {
    /// 汇总行（CPU 列为 `all`）的使用率
    pub all: Option<f64>,
    /// 各核心使用率：(核心编号, 使用率)
    pub cores: Vec<(u32, f64)>,
}

/// 解析 `mpstat -P ALL` 输出
///
/// 文本中不含 `all` 时视为无效输出。第二列为数字的是单核行，
/// 否则为汇总行；使用率 = (100 - %idle) / 100。
pub fn parse_cpu_util(output: &str) -> Option<CpuUtil> {
    if !output.to_ascii_lowercase().contains("all") {
        return None;
    }

    let mut util = CpuUtil::default();

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(cpu) = fields.get(1) else {
            continue;
        };
        let Some(idle) = fields.get(MPSTAT_IDLE_COLUMN).and_then(|s| parse_number(s)) else {
            continue;
        };
        let usage = round_to((100.0 - idle) / 100.0, 2);

        match cpu.parse::<u32>() {
            Ok(core) => util.cores.push((core, usage)),
            Err(_) => {
                if util.all.is_none() {
                    util.all = Some(usage);
                }
            }
        }
    }

    if util.all.is_none() && util.cores.is_empty() {
        return None;
    }

    Some(util)
}

/// 解析 `free` 输出中的 `Mem:` 行，返回已用比例
pub fn parse_mem_util(output: &str) -> Option<f64> {
    output.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        if parts.next()? != "Mem:" {
            return None;
        }
        let total = parse_number(parts.next()?)?;
        let used = parse_number(parts.next()?)?;
        if total <= 0.0 {
            return None;
        }
        Some(round_to(used / total, 2))
    })
}

/// 解析 df 管道输出的百分比
pub fn parse_sd_util(output: &str) -> Option<f64> {
    parse_number(output.trim_end_matches(['\n', '\r'])).map(|percent| percent / 100.0)
}

/// 单核使用率路径：在最后一段前插入 `core.<编号+1>`
///
/// `environment.rpi.cpu.utilisation` + 0 -> `environment.rpi.cpu.core.1.utilisation`
pub fn per_core_path(base: &str, core: u32) -> String {
    match base.rsplit_once('.') {
        Some((prefix, last)) => format!("{prefix}.core.{}.{last}", core + 1),
        None => format!("core.{}.{base}", core + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MPSTAT_SAMPLE: &str = "\
12:00:01     all    2.01    0.00    1.00    0.00    0.00    0.00    0.00    0.00    0.00   96.99
12:00:01       0    4.00    0.00    2.00    0.00    0.00    0.00    0.00    0.00    0.00   94.00
12:00:01       1    1.00    0.00    0.00    0.00    0.00    0.00    0.00    0.00    0.00   99.00
";

    const FREE_SAMPLE: &str = "\
              total        used        free      shared  buff/cache   available
Mem:        3884136      631420     2517272       34772      735444     3103436
Swap:        102396           0      102396
";

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(318.149999, 2), 318.15);
        assert_eq!(round_to(1.23456789, 4), 1.2346);
        assert_eq!(round_to(0.0, 5), 0.0);
    }

    #[test]
    fn test_parse_gpu_temp() {
        assert_eq!(parse_gpu_temp("temp=45.0'C\n"), Some(318.15));
        assert_eq!(parse_gpu_temp("temp=51.5'C"), Some(324.65));
    }

    #[test]
    fn test_parse_gpu_temp_malformed() {
        assert_eq!(parse_gpu_temp(""), None);
        assert_eq!(parse_gpu_temp("temp 45.0'C"), None);
        assert_eq!(parse_gpu_temp("temp=hot'C"), None);
        assert_eq!(parse_gpu_temp("temp='C"), None);
        assert_eq!(parse_gpu_temp("temp=nan'C"), None);
    }

    #[test]
    fn test_parse_cpu_temp() {
        assert_eq!(parse_cpu_temp("45000\n"), Some(318.15));
        assert_eq!(parse_cpu_temp(""), None);
        assert_eq!(parse_cpu_temp("cat: no such file"), None);
    }

    #[test]
    fn test_parse_core_voltage() {
        assert_eq!(parse_core_voltage("volt=1.2000V\n"), Some(1.2));
        assert_eq!(parse_core_voltage("volt=0.87654321V"), Some(0.8765));
        assert_eq!(parse_core_voltage("volt=V"), None);
        assert_eq!(parse_core_voltage("1.2V"), None);
    }

    #[test]
    fn test_parse_bat_voltage() {
        assert_eq!(parse_bat_voltage("12500"), Some(12.5));
        assert_eq!(parse_bat_voltage("12500\n"), Some(12.5));
        assert_eq!(parse_bat_voltage("12345.678"), Some(12.34568));
        assert_eq!(parse_bat_voltage(""), None);
        assert_eq!(parse_bat_voltage("n/a"), None);
    }

    #[test]
    fn test_parse_throttled() {
        assert_eq!(parse_throttled("throttled=0x50000\n"), Some("0".to_string()));
        assert_eq!(parse_throttled("throttled=0x50005"), Some("5".to_string()));
        assert_eq!(parse_throttled("throttled=\n"), None);
        assert_eq!(parse_throttled("throttled="), None);
        assert_eq!(parse_throttled(""), None);
    }

    #[test]
    fn test_parse_cpu_count() {
        assert_eq!(parse_cpu_count("4\n"), 4.0);
        assert_eq!(parse_cpu_count("0"), 1.0);
        assert_eq!(parse_cpu_count("-2"), 1.0);
        assert_eq!(parse_cpu_count("abc"), 1.0);
        assert_eq!(parse_cpu_count(""), 1.0);
    }

    #[test]
    fn test_load_per_core() {
        let cpus = parse_cpu_count("4");
        let load = parse_load_average(" 1.20\n").unwrap();
        assert!((load_per_core(load, cpus) - 0.3).abs() < 1e-12);

        // 核心数无效时按 1 计算
        let cpus = parse_cpu_count("");
        assert_eq!(load_per_core(0.75, cpus), 0.75);
        assert_eq!(parse_load_average(""), None);
    }

    #[test]
    fn test_parse_cpu_util() {
        let util = parse_cpu_util(MPSTAT_SAMPLE).unwrap();
        assert_eq!(util.all, Some(0.03));
        assert_eq!(util.cores, vec![(0, 0.06), (1, 0.01)]);
    }

    #[test]
    fn test_parse_cpu_util_aggregate_selection() {
        // 第二列非数字即视为汇总行
        let line = "12:00:01 all 0 0 0 0 0 0 0 0 0 75.00";
        assert_eq!(parse_cpu_util(line).unwrap().all, Some(0.25));

        let util = parse_cpu_util("12:00:01 ALL 0 0 0 0 0 0 0 0 0 40\n").unwrap();
        assert_eq!(util.all, Some(0.6));
        assert!(util.cores.is_empty());
    }

    #[test]
    fn test_parse_cpu_util_malformed() {
        assert_eq!(parse_cpu_util(""), None);
        assert_eq!(parse_cpu_util("mpstat: command not found"), None);
        assert_eq!(parse_cpu_util("12:00:01 all 1 2 3"), None);
    }

    #[test]
    fn test_parse_mem_util() {
        assert_eq!(parse_mem_util("Mem: 1000 400 600 0 0 0"), Some(0.4));
        assert_eq!(parse_mem_util(FREE_SAMPLE), Some(0.16));
    }

    #[test]
    fn test_parse_mem_util_malformed() {
        assert_eq!(parse_mem_util(""), None);
        assert_eq!(parse_mem_util("Swap: 100 0 100"), None);
        assert_eq!(parse_mem_util("Mem: 0 0 0"), None);
        assert_eq!(parse_mem_util("Mem: total used"), None);
    }

    #[test]
    fn test_parse_sd_util() {
        assert_eq!(parse_sd_util("55"), Some(0.55));
        assert_eq!(parse_sd_util("55\n"), Some(0.55));
        assert_eq!(parse_sd_util(""), None);
        assert_eq!(parse_sd_util("55%"), None);
    }

    #[test]
    fn test_per_core_path() {
        assert_eq!(
            per_core_path("environment.rpi.cpu.utilisation", 0),
            "environment.rpi.cpu.core.1.utilisation"
        );
        assert_eq!(per_core_path("util", 3), "core.4.util");
    }
}
