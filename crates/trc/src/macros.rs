/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

#[macro_export]
macro_rules! event {
    ($event:ident($($param:tt)*) $(, $key:ident = $value:expr)* $(,)?) => {{
        $crate::Event::with_capacity($crate::EventType::$event($($param)*), 4)
            $(.ctx($crate::Key::$key, $value))*
            .send()
    }};
}

#[macro_export]
macro_rules! error {
    ($err:expr $(,)?) => {{
        let err: $crate::Error = $err;
        err.send()
    }};
}

#[macro_export]
macro_rules! location {
    () => {{ concat!(file!(), ":", line!()) }};
}

#[macro_export]
macro_rules! bail {
    ($err:expr $(,)?) => {
        return Err($err)
    };
}
