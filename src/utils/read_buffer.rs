/// Buffer for a fixed number of bytes to be read.
///
/// The buffer is filled from a [bytes::Buf] using [ReadBuffer::put]. Once the
/// expected number of bytes are read the buffer data is returned and the buffer
/// is reset.
#[derive(Debug)]
pub struct ReadBuffer {
    data: Vec<u8>,
    read_count: usize,
}

impl ReadBuffer {
    pub fn new(size: usize) -> Self {
        ReadBuffer {
            data: vec![0u8; size],
            read_count: 0,
        }
    }

    pub fn put(&mut self, data: &mut impl bytes::Buf) -> Option<Vec<u8>> {
        let need = self.data.len() - self.read_count;
        let read_count_current = std::cmp::min(data.remaining(), need);
        let end = self.read_count + read_count_current;
        data.copy_to_slice(&mut self.data[self.read_count..end]);
        self.read_count += read_count_current;
        if self.read_count == self.data.len() {
            Some(self.finish())
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read_count == 0
    }

    fn finish(&mut self) -> Vec<u8> {
        self.read_count = 0;
        std::mem::take(&mut self.data)
    }
}
