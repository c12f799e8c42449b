//! Address literals and shorthand for the tunneling data path.

/// Creates a [`GroupAddress`](crate::addressing::GroupAddress) from 3-level notation.
///
/// Components are checked at compile time: main 0-31, middle 0-7, sub 0-255.
///
/// ```
/// use knx_link::ga;
/// use knx_link::GroupAddress;
///
/// assert_eq!(ga!(1/2/3), GroupAddress::new(1, 2, 3).unwrap());
/// assert_eq!(ga!(1/2/3).to_string(), "1/2/3");
/// ```
///
/// ```compile_fail
/// // middle group > 7
/// let addr = knx_link::ga!(1/8/0);
/// ```
#[macro_export]
macro_rules! ga {
    ($main:literal / $middle:literal / $sub:literal) => {{
        const _: () = {
            if $main > 31 {
                panic!("Main group must be 0-31");
            }
            if $middle > 7 {
                panic!("Middle group must be 0-7");
            }
            if $sub > 255 {
                panic!("Sub group must be 0-255");
            }
        };

        // 5 bits main, 3 bits middle, 8 bits sub
        const RAW: u16 = (($main & 0x1F) << 11) | (($middle & 0x07) << 8) | ($sub & 0xFF);
        $crate::addressing::GroupAddress::from(RAW)
    }};
}

/// `client.write_request(ga!(main/middle/sub), data)`
///
/// ```no_run
/// use knx_link::{knx_write, Config, KnxClient};
/// use knx_link::plugin::PluginRegistry;
///
/// let client = KnxClient::new(Config::builder().build()?, PluginRegistry::default())?;
/// client.connect()?;
/// knx_write!(client, 1/2/3, &[0x01])?;
/// # Ok::<(), knx_link::KnxError>(())
/// ```
#[macro_export]
macro_rules! knx_write {
    ($client:expr, $main:literal / $middle:literal / $sub:literal, $data:expr) => {
        $client.write_request($crate::ga!($main / $middle / $sub), $data)
    };
}

/// `client.read_request(ga!(main/middle/sub))`
///
/// The answer lands in the status pool:
///
/// ```no_run
/// use knx_link::{ga, knx_read, Config, KnxClient};
/// use knx_link::plugin::PluginRegistry;
///
/// let client = KnxClient::new(Config::builder().build()?, PluginRegistry::default())?;
/// client.connect()?;
/// knx_read!(client, 1/2/10)?;
/// let value = client.status(ga!(1/2/10));
/// # Ok::<(), knx_link::KnxError>(())
/// ```
#[macro_export]
macro_rules! knx_read {
    ($client:expr, $main:literal / $middle:literal / $sub:literal) => {
        $client.read_request($crate::ga!($main / $middle / $sub))
    };
}

#[cfg(test)]
mod tests {
    use crate::addressing::GroupAddress;

    #[test]
    fn test_ga_macro_basic() {
        assert_eq!(ga!(1 / 2 / 3), GroupAddress::from(0x0A03));
    }

    #[test]
    fn test_ga_macro_boundaries() {
        assert_eq!(ga!(31 / 7 / 255).raw(), 0xFFFF);
        assert_eq!(ga!(0 / 0 / 0).raw(), 0);
        assert_eq!(ga!(5 / 3 / 100), GroupAddress::from(0x2B64));
    }
}
