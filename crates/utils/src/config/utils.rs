/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::time::Duration;

pub trait ParseValue: Sized {
    fn parse_value(value: &str) -> Result<Self, String>;
}

pub trait AsKey: Clone {
    fn as_key(&self) -> String;
    fn as_prefix(&self) -> String;
}

impl AsKey for &str {
    fn as_key(&self) -> String {
        self.to_string()
    }

    fn as_prefix(&self) -> String {
        format!("{self}.")
    }
}

impl AsKey for String {
    fn as_key(&self) -> String {
        self.clone()
    }

    fn as_prefix(&self) -> String {
        format!("{self}.")
    }
}

impl AsKey for &String {
    fn as_key(&self) -> String {
        self.to_string()
    }

    fn as_prefix(&self) -> String {
        format!("{self}.")
    }
}

impl AsKey for (&str, &str) {
    fn as_key(&self) -> String {
        format!("{}.{}", self.0, self.1)
    }

    fn as_prefix(&self) -> String {
        format!("{}.{}.", self.0, self.1)
    }
}

impl AsKey for (&String, &str) {
    fn as_key(&self) -> String {
        format!("{}.{}", self.0, self.1)
    }

    fn as_prefix(&self) -> String {
        format!("{}.{}.", self.0, self.1)
    }
}

impl AsKey for (&str, &str, &str) {
    fn as_key(&self) -> String {
        format!("{}.{}.{}", self.0, self.1, self.2)
    }

    fn as_prefix(&self) -> String {
        format!("{}.{}.{}.", self.0, self.1, self.2)
    }
}

impl AsKey for (&str, &String, &str) {
    fn as_key(&self) -> String {
        format!("{}.{}.{}", self.0, self.1, self.2)
    }

    fn as_prefix(&self) -> String {
        format!("{}.{}.{}.", self.0, self.1, self.2)
    }
}

impl ParseValue for String {
    fn parse_value(value: &str) -> Result<Self, String> {
        Ok(value.to_string())
    }
}

impl ParseValue for bool {
    fn parse_value(value: &str) -> Result<Self, String> {
        match value {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(format!("Invalid boolean value {value:?}.")),
        }
    }
}

macro_rules! parse_number {
    ($($t:ty),*) => {
        $(
            impl ParseValue for $t {
                fn parse_value(value: &str) -> Result<Self, String> {
                    value
                        .trim()
                        .parse::<$t>()
                        .map_err(|_| format!("Invalid integer value {value:?}."))
                }
            }
        )*
    };
}

parse_number!(u16, u32, u64, usize, i32, i64);

impl<T: ParseValue> ParseValue for Option<T> {
    fn parse_value(value: &str) -> Result<Self, String> {
        if value.is_empty()
            || value.eq_ignore_ascii_case("false")
            || value.eq_ignore_ascii_case("disable")
            || value.eq_ignore_ascii_case("disabled")
        {
            Ok(None)
        } else {
            T::parse_value(value).map(Some)
        }
    }
}

impl ParseValue for Duration {
    fn parse_value(value: &str) -> Result<Self, String> {
        let value = value.trim();
        let (digits, unit) = value
            .find(|ch: char| !ch.is_ascii_digit())
            .map_or((value, ""), |pos| value.split_at(pos));
        let num = digits
            .parse::<u64>()
            .map_err(|_| format!("Invalid duration value {value:?}."))?;

        match unit.trim() {
            "d" => Ok(Duration::from_secs(num * 24 * 60 * 60)),
            "h" => Ok(Duration::from_secs(num * 60 * 60)),
            "m" => Ok(Duration::from_secs(num * 60)),
            "s" => Ok(Duration::from_secs(num)),
            "ms" | "" => Ok(Duration::from_millis(num)),
            _ => Err(format!("Invalid duration value {value:?}.")),
        }
    }
}
