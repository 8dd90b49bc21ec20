//! Numeric replies and verbs the engine listens for.
//!
//! Only the subset this crate correlates on is listed here.

/// `:<server> 001 <me> :Welcome ...`
pub const RPL_WELCOME: &str = "001";
/// `:<server> 005 <me> *(<key>[=<value>]) :are supported by this server`
pub const RPL_ISUPPORT: &str = "005";
/// `:<server> 263 <me> <command> :Server load is temporarily too heavy`
pub const RPL_TRYAGAIN: &str = "263";
/// `:<server> 301 <me> <nick> :<away message>`
pub const RPL_AWAY: &str = "301";
/// `:<server> 311 <me> <nick> <user> <host> * :<real name>`
pub const RPL_WHOISUSER: &str = "311";
/// `:<server> 312 <me> <nick> <server> :<server info>`
pub const RPL_WHOISSERVER: &str = "312";
/// `:<server> 313 <me> <nick> :is an IRC operator`
pub const RPL_WHOISOPERATOR: &str = "313";
/// `:<server> 317 <me> <nick> <seconds> [<signon>] :seconds idle`
pub const RPL_WHOISIDLE: &str = "317";
/// `:<server> 318 <me> <nick> :End of WHOIS list`
pub const RPL_ENDOFWHOIS: &str = "318";
/// `:<server> 319 <me> <nick> :*( [prefix]<channel> " " )`
pub const RPL_WHOISCHANNELS: &str = "319";
/// `:<server> 367 <me> <channel> <mask> [<setter> [<set ts>]]`
pub const RPL_BANLIST: &str = "367";
/// `:<server> 368 <me> <channel> :End of channel ban list`
pub const RPL_ENDOFBANLIST: &str = "368";
/// `:<server> 401 <me> <nick> :No such nick/channel`
pub const ERR_NOSUCHNICK: &str = "401";
/// `:<server> 403 <me> <channel> :No such channel`
pub const ERR_NOSUCHCHANNEL: &str = "403";
/// `:<server> 431 <me> :No nickname given`
pub const ERR_NONICKNAMEGIVEN: &str = "431";
/// `:<server> 442 <me> <channel> :You're not on that channel`
pub const ERR_NOTONCHANNEL: &str = "442";
/// `:<server> 478 <me> <channel> <mask> :Channel ban list is full`
pub const ERR_BANLISTFULL: &str = "478";
/// `:<server> 482 <me> <channel> :You're not channel operator`
pub const ERR_CHANOPRIVSNEEDED: &str = "482";
