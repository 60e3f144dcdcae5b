/// MySQL Driver Module
///
/// Production `Driver`/`Connector` pair backed by the `mysql` crate. Rows come
/// back over the binary protocol and are converted into runtime `Value`s;
/// temporal values are rendered as text the way the server prints them.
use crate::config::DatabaseConfig;
use crate::core::db::driver::{Connector, Driver, DriverError, Execution};
use crate::core::db::query::ResultSet;
use crate::core::db::value::Value;
use crate::core::{GatewayError, Result};
use chrono::NaiveDate;
use mysql::prelude::Queryable;
use tracing::{debug, info};

/// Opens `MySqlDriver` sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlConnector;

impl Connector for MySqlConnector {
    fn open(&self, config: &DatabaseConfig) -> Result<Box<dyn Driver>> {
        info!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            "Opening MySQL connection"
        );

        let opts = mysql::OptsBuilder::new()
            .ip_or_hostname(Some(config.host.clone()))
            .tcp_port(config.port)
            .db_name(Some(config.name.clone()))
            .user(Some(config.username.clone()))
            .pass(Some(config.password.clone()))
            .init(vec![format!("SET SESSION wait_timeout = {}", config.wait_timeout)]);

        let conn = mysql::Conn::new(opts).map_err(|e| {
            GatewayError::Connection(format!(
                "Unable to connect to database server {}:{}: {}",
                config.host, config.port, e
            ))
        })?;

        Ok(Box::new(MySqlDriver { conn }))
    }
}

/// One MySQL session.
pub struct MySqlDriver {
    conn: mysql::Conn,
}

impl Driver for MySqlDriver {
    fn execute(&mut self, sql: &str, params: &[Value]) -> std::result::Result<Execution, DriverError> {
        let bound = params
            .iter()
            .map(to_mysql_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let bound = if bound.is_empty() {
            mysql::Params::Empty
        } else {
            mysql::Params::Positional(bound)
        };

        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::new();
        {
            let result = self.conn.exec_iter(sql, bound).map_err(driver_error)?;
            for row in result {
                let row = row.map_err(driver_error)?;
                if columns.is_empty() {
                    columns = row
                        .columns_ref()
                        .iter()
                        .map(|c| c.name_str().into_owned())
                        .collect();
                }
                rows.push(row.unwrap().into_iter().map(from_mysql_value).collect());
            }
        }

        Ok(Execution {
            result: ResultSet::new(columns, rows),
            last_insert_id: self.conn.last_insert_id(),
            affected_rows: self.conn.affected_rows(),
        })
    }

    fn ping(&mut self) -> std::result::Result<(), DriverError> {
        self.conn.query_drop("SELECT 1").map_err(driver_error)
    }

    fn escape(&self, raw: &str) -> String {
        let quoted = mysql::Value::Bytes(raw.as_bytes().to_vec()).as_sql(false);
        match quoted.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
            Some(inner) => inner.to_string(),
            None => {
                debug!("native escape produced a non-string literal; using generic escape");
                crate::core::db::driver::escape_generic(raw)
            }
        }
    }

    fn begin(&mut self) -> std::result::Result<(), DriverError> {
        self.conn.query_drop("START TRANSACTION").map_err(driver_error)
    }

    fn commit(&mut self) -> std::result::Result<(), DriverError> {
        self.conn.query_drop("COMMIT").map_err(driver_error)
    }

    fn rollback(&mut self) -> std::result::Result<(), DriverError> {
        self.conn.query_drop("ROLLBACK").map_err(driver_error)
    }
}

/// CR_SERVER_GONE_ERROR and CR_SERVER_LOST
const GONE_AWAY_CODES: [u16; 2] = [2006, 2013];

fn driver_error(err: mysql::Error) -> DriverError {
    let gone_away = match &err {
        mysql::Error::IoError(_) => true,
        mysql::Error::MySqlError(server) => GONE_AWAY_CODES.contains(&server.code),
        _ => false,
    };
    let message = err.to_string();
    if gone_away || message.contains("gone away") {
        DriverError::gone_away(message)
    } else {
        DriverError::new(message)
    }
}

fn to_mysql_value(value: &Value) -> std::result::Result<mysql::Value, DriverError> {
    Ok(match value {
        Value::Null => mysql::Value::NULL,
        Value::Bool(b) => mysql::Value::Int(i64::from(*b)),
        Value::Int(i) => mysql::Value::Int(*i),
        Value::UInt(u) => mysql::Value::UInt(*u),
        Value::Float(f) => mysql::Value::Double(*f),
        Value::Text(s) => mysql::Value::Bytes(s.as_bytes().to_vec()),
        Value::Bytes(b) => mysql::Value::Bytes(b.clone()),
        Value::EmptyString => mysql::Value::Bytes(Vec::new()),
        Value::List(_) => {
            return Err(DriverError::new(
                "array parameters must be expanded before binding",
            ))
        }
    })
}

fn from_mysql_value(value: mysql::Value) -> Value {
    match value {
        mysql::Value::NULL => Value::Null,
        mysql::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Value::Text(text),
            Err(err) => Value::Bytes(err.into_bytes()),
        },
        mysql::Value::Int(i) => Value::Int(i),
        mysql::Value::UInt(u) => Value::UInt(u),
        mysql::Value::Float(f) => Value::Float(f64::from(f)),
        mysql::Value::Double(d) => Value::Float(d),
        mysql::Value::Date(year, month, day, hour, minute, second, micros) => {
            Value::Text(format_datetime(year, month, day, hour, minute, second, micros))
        }
        mysql::Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_hours = days * 24 + u32::from(hours);
            let sign = if negative { "-" } else { "" };
            let mut text = format!("{}{:02}:{:02}:{:02}", sign, total_hours, minutes, seconds);
            if micros > 0 {
                text.push_str(&format!(".{:06}", micros));
            }
            Value::Text(text)
        }
    }
}

fn format_datetime(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8, micros: u32) -> String {
    let parsed = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
        .and_then(|date| {
            date.and_hms_micro_opt(u32::from(hour), u32::from(minute), u32::from(second), micros)
        });

    match parsed {
        Some(datetime) if micros > 0 => datetime.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
        // Zero dates ('0000-00-00') are legal in MySQL but not in chrono
        None => format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            year, month, day, hour, minute, second
        ),
    }
}
