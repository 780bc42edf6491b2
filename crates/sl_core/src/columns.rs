//! 列角色发现
//!
//! 工作簿没有固定表头。导入时按语义角色对表头做大小写/重音不敏感的模糊匹配，
//! 找不到时回退到字面列名。同一次导入发现的映射在下一次完整重载前一直复用。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 语义列角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ColumnRole {
    /// 服务标识
    Service,
    /// 当前覆盖状态
    Coverage,
    /// 健康/缺勤状态
    Health,
    /// 在岗员工
    Incumbent,
    /// 替补员工
    Substitute,
    /// 排班
    Schedule,
    /// 合同截止日期
    ContractEnd,
}

/// 表头匹配规则
#[derive(Debug, Clone, Copy)]
enum Matcher {
    Contains(&'static str),
    Equals(&'static str),
}

impl Matcher {
    fn matches(&self, normalized: &str) -> bool {
        match self {
            Matcher::Contains(needle) => normalized.contains(needle),
            Matcher::Equals(exact) => normalized == *exact,
        }
    }
}

impl ColumnRole {
    /// 发现顺序；先发现的角色占用的表头不会再分配给后面的角色
    pub const ALL: [ColumnRole; 7] = [
        ColumnRole::Service,
        ColumnRole::Coverage,
        ColumnRole::Health,
        ColumnRole::Incumbent,
        ColumnRole::Substitute,
        ColumnRole::Schedule,
        ColumnRole::ContractEnd,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnRole::Service => "service",
            ColumnRole::Coverage => "coverage",
            ColumnRole::Health => "health",
            ColumnRole::Incumbent => "incumbent",
            ColumnRole::Substitute => "substitute",
            ColumnRole::Schedule => "schedule",
            ColumnRole::ContractEnd => "contract_end",
        }
    }

    /// 找不到匹配表头时使用的字面列名
    pub fn fallback_header(self) -> &'static str {
        match self {
            ColumnRole::Service => "SERVICIO",
            ColumnRole::Coverage => "ESTADO",
            ColumnRole::Health => "SITUACION",
            ColumnRole::Incumbent => "TITULAR",
            ColumnRole::Substitute => "SUPLENTE",
            ColumnRole::Schedule => "HORARIO",
            ColumnRole::ContractEnd => "FIN CONTRATO",
        }
    }

    fn matchers(self) -> &'static [Matcher] {
        match self {
            ColumnRole::Service => &[Matcher::Contains("SERVICIO")],
            ColumnRole::Coverage => &[Matcher::Equals("ESTADO"), Matcher::Contains("COBERTURA")],
            ColumnRole::Health => &[
                Matcher::Contains("SALUD"),
                Matcher::Contains("SITUACION"),
                Matcher::Contains("BAJA"),
            ],
            ColumnRole::Incumbent => &[Matcher::Contains("TITULAR")],
            ColumnRole::Substitute => &[Matcher::Contains("SUPLENTE")],
            ColumnRole::Schedule => &[Matcher::Contains("HORARIO"), Matcher::Contains("TURNO")],
            ColumnRole::ContractEnd => &[
                Matcher::Contains("FIN CONTRATO"),
                Matcher::Contains("FIN DE CONTRATO"),
                Matcher::Contains("VENCIMIENTO"),
            ],
        }
    }
}

/// 表头规范化: 去空白、转大写、去除西语重音
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_uppercase()
        .chars()
        .map(|c| match c {
            'Á' | 'À' => 'A',
            'É' | 'È' => 'E',
            'Í' | 'Ì' => 'I',
            'Ó' | 'Ò' => 'O',
            'Ú' | 'Ù' | 'Ü' => 'U',
            other => other,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 单个角色的绑定结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnBinding {
    /// 实际使用的表头
    pub header: String,
    /// 是否来自字面回退
    pub fallback: bool,
}

/// 角色 -> 表头映射
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnMap {
    bindings: BTreeMap<ColumnRole, ColumnBinding>,
}

impl ColumnMap {
    /// 对给定表头做角色发现
    pub fn discover(headers: &[String]) -> Self {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let mut claimed = vec![false; headers.len()];
        let mut bindings = BTreeMap::new();

        for role in ColumnRole::ALL {
            let hit = role.matchers().iter().find_map(|m| {
                normalized
                    .iter()
                    .enumerate()
                    .find(|(i, h)| !claimed[*i] && m.matches(h))
                    .map(|(i, _)| i)
            });

            let binding = match hit {
                Some(i) => {
                    claimed[i] = true;
                    ColumnBinding { header: headers[i].clone(), fallback: false }
                }
                None => {
                    tracing::debug!(role = role.as_str(), "no header matched, using literal fallback");
                    ColumnBinding { header: role.fallback_header().to_string(), fallback: true }
                }
            };
            bindings.insert(role, binding);
        }

        Self { bindings }
    }

    /// 角色对应的表头
    pub fn column(&self, role: ColumnRole) -> &str {
        self.bindings
            .get(&role)
            .map(|b| b.header.as_str())
            .unwrap_or_else(|| role.fallback_header())
    }

    pub fn is_fallback(&self, role: ColumnRole) -> bool {
        self.bindings.get(&role).map(|b| b.fallback).unwrap_or(true)
    }

    pub fn bindings(&self) -> impl Iterator<Item = (ColumnRole, &ColumnBinding)> {
        self.bindings.iter().map(|(r, b)| (*r, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_discover_fuzzy_headers() {
        let map = ColumnMap::discover(&headers(&[
            "Nº Servicio",
            "Estado",
            "Situación Salud",
            "Trabajador Titular",
            "suplente asignado",
            "Horario",
            "Fecha fin contrato",
        ]));
        assert_eq!(map.column(ColumnRole::Service), "Nº Servicio");
        assert_eq!(map.column(ColumnRole::Coverage), "Estado");
        assert_eq!(map.column(ColumnRole::Health), "Situación Salud");
        assert_eq!(map.column(ColumnRole::Incumbent), "Trabajador Titular");
        assert_eq!(map.column(ColumnRole::Substitute), "suplente asignado");
        assert_eq!(map.column(ColumnRole::Schedule), "Horario");
        assert_eq!(map.column(ColumnRole::ContractEnd), "Fecha fin contrato");
        assert!(!map.is_fallback(ColumnRole::ContractEnd));
    }

    #[test]
    fn test_estado_requires_exact_match() {
        // "ESTADO SALUD" 不能被当作覆盖状态列
        let map = ColumnMap::discover(&headers(&["SERVICIO", "ESTADO SALUD"]));
        assert!(map.is_fallback(ColumnRole::Coverage));
        assert_eq!(map.column(ColumnRole::Coverage), "ESTADO");
        assert_eq!(map.column(ColumnRole::Health), "ESTADO SALUD");
    }

    #[test]
    fn test_claimed_header_not_reused() {
        let map = ColumnMap::discover(&headers(&["SERVICIO TITULAR", "TITULAR"]));
        assert_eq!(map.column(ColumnRole::Service), "SERVICIO TITULAR");
        assert_eq!(map.column(ColumnRole::Incumbent), "TITULAR");
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  situación   de  baja "), "SITUACION DE BAJA");
    }
}
