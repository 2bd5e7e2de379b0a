/// Operation types the API can describe
pub const OPERATION_TYPES: [&str; 14] = [
    "MINT",
    "BURN",
    "CALL",
    "FEE",
    "PAYMENT",
    "ERC20_TRANSFER",
    "CREATE",
    "CREATE2",
    "SELFDESTRUCT",
    "CALLCODE",
    "DELEGATECALL",
    "STATICCALL",
    "DESTRUCT",
    "ERC20_MINT",
];

pub const SUCCESS_STATUS: &str = "SUCCESS";
pub const FAILURE_STATUS: &str = "FAILURE";

/// Node methods callable through `/call`
pub const CALL_METHODS: [&str; 4] = [
    "eth_getBlockByNumber",
    "eth_getTransactionReceipt",
    "eth_call",
    "eth_estimateGas",
];

pub const HISTORICAL_BALANCE_SUPPORTED: bool = true;
pub const INCLUDE_MEMPOOL_COINS: bool = false;
